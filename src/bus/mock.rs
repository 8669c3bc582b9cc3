// =============================================================================
// MockBus — in-memory Bus double for unit tests
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::bus::Bus;
use crate::error::{BridgeError, Result};

/// In-memory bus. Publishes are recorded; KV/hash/set ops hit process-local
/// maps. `fail_publishes(n)` makes the next n publishes fail to exercise the
/// retry path.
#[derive(Default)]
pub struct MockBus {
    pub published: Mutex<Vec<(String, String)>>,
    pub kv: Mutex<HashMap<String, (String, u64)>>,
    pub hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    pub sets: Mutex<HashMap<String, HashSet<String>>>,
    publish_attempts: AtomicU64,
    fail_remaining: AtomicU64,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<String>>>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` publish calls with a transport error.
    pub fn fail_publishes(&self, n: u64) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn publish_attempts(&self) -> u64 {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    /// All payloads recorded on a channel.
    pub fn published_on(&self, channel: &str) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Inject a message to every subscriber of `channel`, as if it had been
    /// published externally.
    pub async fn inject(&self, channel: &str, payload: &str) {
        let senders = self
            .subscribers
            .lock()
            .get(channel)
            .cloned()
            .unwrap_or_default();
        for tx in senders {
            let _ = tx.send(payload.to_string()).await;
        }
    }
}

#[async_trait]
impl Bus for MockBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(BridgeError::Bus("mock transport failure".into()));
        }
        self.published
            .lock()
            .push((channel.to_string(), payload.to_string()));
        // Mirror publishes to any live subscriber.
        let senders = self
            .subscribers
            .lock()
            .get(channel)
            .cloned()
            .unwrap_or_default();
        for tx in senders {
            let _ = tx.send(payload.to_string()).await;
        }
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.kv
            .lock()
            .insert(key.to_string(), (value.to_string(), ttl_secs));
        Ok(())
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut hashes = self.hashes.lock();
        let entry = hashes.entry(key.to_string()).or_default();
        for (f, v) in fields {
            entry.insert(f.clone(), v.clone());
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self.hashes.lock().get(key).cloned().unwrap_or_default())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.sets
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        if let Some(set) = self.sets.lock().get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .lock()
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.kv.lock().remove(key);
        self.hashes.lock().remove(key);
        self.sets.lock().remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(64);
        self.subscribers
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}
