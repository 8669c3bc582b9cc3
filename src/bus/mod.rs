// =============================================================================
// Bus — pub/sub + KV capability over Redis
// =============================================================================
//
// The bridge talks to the bus through this trait so the engine, control
// plane, registry, and health reporter can be exercised against an in-memory
// double. The publisher, control plane, and health reporter each hold their
// own handle to avoid head-of-line blocking on a shared connection.
// =============================================================================

pub mod redis;

#[cfg(test)]
pub mod mock;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

pub use self::redis::RedisBus;

/// Pub/sub and key-value operations the bridge needs from the bus.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish a payload on a pub/sub channel.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Set a string key with a TTL in seconds.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Write all fields of a hash key.
    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// Read all fields of a hash key; empty map when the key is absent.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn sadd(&self, key: &str, member: &str) -> Result<()>;

    async fn srem(&self, key: &str, member: &str) -> Result<()>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Round-trip liveness probe.
    async fn ping(&self) -> Result<()>;

    /// Subscribe to a pub/sub channel. Message payloads arrive on the
    /// returned receiver; the implementation owns reconnection, so the
    /// receiver stays live across transport failures (messages delivered
    /// during an outage are lost, by contract).
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>>;
}
