use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::application::{EngineConfig, LedgerEngine};
use crate::cache::{BalanceCache, MemoryCache, NoCache, RedisCache};
use crate::lock::{MemoryLock, NamedLock, RedisLock};
use crate::storage::SqliteStore;

/// Runtime settings. Every flag falls back to a `COFFER_*` environment
/// variable.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Database file path
    #[arg(short, long, env = "COFFER_DATABASE", default_value = "coffer.db", global = true)]
    pub database: String,

    /// Redis URL for the shared balance cache and wallet locks
    /// (in-process when omitted)
    #[arg(long, env = "COFFER_REDIS_URL", global = true)]
    pub redis_url: Option<String>,

    /// Seconds a cached balance stays valid
    #[arg(long, env = "COFFER_CACHE_TTL_SECS", default_value_t = 5, global = true)]
    pub cache_ttl_secs: u64,

    /// Seconds before an abandoned wallet lock expires
    #[arg(long, env = "COFFER_LOCK_TTL_SECS", default_value_t = 10, global = true)]
    pub lock_ttl_secs: u64,

    /// Log filter, e.g. "info" or "coffer=debug"
    #[arg(long, env = "COFFER_LOG", default_value = "info", global = true)]
    pub log: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Disable the balance cache
    #[arg(long, global = true)]
    pub no_cache: bool,
}

impl Settings {
    pub fn database_url(&self) -> String {
        format!("sqlite:{}", self.database)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            lock_ttl: Duration::from_secs(self.lock_ttl_secs),
            ..EngineConfig::default()
        }
    }

    /// Wire an engine over `store` with the configured cache and locks.
    pub async fn build_engine(&self, store: SqliteStore) -> Result<LedgerEngine> {
        let (cache, locks): (Arc<dyn BalanceCache>, Arc<dyn NamedLock>) =
            match &self.redis_url {
                Some(url) => {
                    info!("using Redis for balance cache and wallet locks");
                    let cache: Arc<dyn BalanceCache> = if self.no_cache {
                        Arc::new(NoCache)
                    } else {
                        Arc::new(RedisCache::connect(url).await?)
                    };
                    (cache, Arc::new(RedisLock::connect(url).await?))
                }
                None => {
                    let cache: Arc<dyn BalanceCache> = if self.no_cache {
                        Arc::new(NoCache)
                    } else {
                        Arc::new(MemoryCache::new())
                    };
                    (cache, Arc::new(MemoryLock::new()))
                }
            };

        Ok(LedgerEngine::new(
            Arc::new(store),
            cache,
            locks,
            self.engine_config(),
        ))
    }
}
