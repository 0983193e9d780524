use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use super::BalanceCache;

struct Slot {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-process cache with per-key expiry, for single-node deployments and tests.
#[derive(Default)]
pub struct MemoryCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots
            .lock()
            .map(|slots| slots.values().filter(|s| s.expires_at > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BalanceCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut slots = self.slots.lock().map_err(|_| anyhow!("cache mutex poisoned"))?;
        match slots.get(key) {
            Some(slot) if slot.expires_at > Instant::now() => Ok(Some(slot.value.clone())),
            Some(_) => {
                slots.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut slots = self.slots.lock().map_err(|_| anyhow!("cache mutex poisoned"))?;
        slots.insert(
            key.to_string(),
            Slot {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        let mut slots = self.slots.lock().map_err(|_| anyhow!("cache mutex poisoned"))?;
        for key in keys {
            slots.remove(key);
        }
        Ok(())
    }
}
