use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use super::{LockToken, NamedLock};

struct Held {
    token: LockToken,
    expires_at: Instant,
}

/// Process-local named locks for single-node deployments.
#[derive(Default)]
pub struct MemoryLock {
    held: Mutex<HashMap<String, Held>>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` is currently held by anyone.
    pub fn is_held(&self, name: &str) -> bool {
        self.held
            .lock()
            .map(|held| {
                held.get(name)
                    .is_some_and(|h| h.expires_at > Instant::now())
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl NamedLock for MemoryLock {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockToken>> {
        let mut held = self.held.lock().map_err(|_| anyhow!("lock table poisoned"))?;
        let now = Instant::now();

        if held.get(name).is_some_and(|h| h.expires_at > now) {
            return Ok(None);
        }

        let token = LockToken::generate();
        held.insert(
            name.to_string(),
            Held {
                token: token.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(Some(token))
    }

    async fn release(&self, name: &str, token: &LockToken) -> Result<()> {
        let mut held = self.held.lock().map_err(|_| anyhow!("lock table poisoned"))?;
        if held.get(name).is_some_and(|h| &h.token == token) {
            held.remove(name);
        }
        Ok(())
    }
}
