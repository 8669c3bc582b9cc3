// =============================================================================
// RedisBus — Bus implementation over redis-rs (tokio)
// =============================================================================

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::error::Result;

/// Delay before re-establishing a dropped pub/sub subscription.
const RESUBSCRIBE_BACKOFF: Duration = Duration::from_millis(500);

/// Buffered messages per subscription before backpressure.
const SUBSCRIBE_CHANNEL_CAPACITY: usize = 256;

/// Redis-backed bus. Command traffic goes through a [`ConnectionManager`],
/// which transparently reconnects; each pub/sub subscription runs its own
/// reader task with explicit resubscription.
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisBus {
    /// Connect to `url` (`redis://[user:pass@]host:port/db`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        debug!(url = %redact(url), "redis bus connected");
        Ok(Self { client, conn })
    }
}

/// Hide any password embedded in a redis URL before it reaches the logs.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, payload).await?;
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(key, member).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBE_CHANNEL_CAPACITY);
        let client = self.client.clone();
        let channel = channel.to_string();

        tokio::spawn(async move {
            loop {
                let mut pubsub = match client.get_async_pubsub().await {
                    Ok(ps) => ps,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "pubsub connect failed, retrying");
                        tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
                        continue;
                    }
                };
                if let Err(e) = pubsub.subscribe(&channel).await {
                    warn!(channel = %channel, error = %e, "pubsub subscribe failed, retrying");
                    tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
                    continue;
                }
                info!(channel = %channel, "pubsub subscription established");

                let mut stream = pubsub.on_message();
                while let Some(msg) = stream.next().await {
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(channel = %channel, error = %e, "undecodable pubsub payload");
                            continue;
                        }
                    };
                    if tx.send(payload).await.is_err() {
                        // Receiver dropped: the consumer is gone.
                        return;
                    }
                }

                if tx.is_closed() {
                    return;
                }
                warn!(channel = %channel, "pubsub stream ended, resubscribing");
                tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_hides_password() {
        assert_eq!(
            redact("redis://:secret@10.0.0.1:6379/0"),
            "redis://***@10.0.0.1:6379/0"
        );
        assert_eq!(redact("redis://127.0.0.1:6379/0"), "redis://127.0.0.1:6379/0");
    }
}
