// =============================================================================
// BarPublisher — schema guard, JSON serialization, publish with retry
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, trace};

use crate::bus::Bus;
use crate::error::{BridgeError, Result};
use crate::metrics::{Metrics, DEFAULT_LATE_THRESHOLD_SECS};
use crate::schema_guard;
use crate::types::{CanonicalBar, PushMode};

/// Publish-path tuning. Defaults match the wire contract: 3 attempts,
/// 100 ms between them, 3 s lateness threshold.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub topic: String,
    pub mode: PushMode,
    pub max_retries: u32,
    pub backoff: Duration,
    pub late_threshold_secs: i64,
}

impl PublisherConfig {
    pub fn new(topic: impl Into<String>, mode: PushMode) -> Self {
        Self {
            topic: topic.into(),
            mode,
            max_retries: 3,
            backoff: Duration::from_millis(100),
            late_threshold_secs: DEFAULT_LATE_THRESHOLD_SECS,
        }
    }
}

/// Outcome of one publish request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// The bar failed the schema guard and was dropped (counted, not an error).
    SchemaDropped,
}

pub struct BarPublisher {
    bus: Arc<dyn Bus>,
    cfg: PublisherConfig,
    metrics: Arc<Metrics>,
}

impl BarPublisher {
    pub fn new(bus: Arc<dyn Bus>, cfg: PublisherConfig, metrics: Arc<Metrics>) -> Self {
        Self { bus, cfg, metrics }
    }

    pub fn topic(&self) -> &str {
        &self.cfg.topic
    }

    pub fn mode(&self) -> PushMode {
        self.cfg.mode
    }

    /// Validate and publish one bar. A schema violation drops the bar and
    /// returns `SchemaDropped`; a transport failure is retried up to
    /// `max_retries` attempts and only then surfaces as `Bus` — the caller
    /// drops that bar and keeps the stream alive.
    pub async fn publish_bar(&self, bar: &CanonicalBar) -> Result<PublishOutcome> {
        if let Err(e) = schema_guard::validate_bar(bar, self.cfg.mode) {
            self.metrics.inc_schema_drop();
            debug!(code = %bar.code, period = %bar.period, error = %e, "schema guard dropped bar");
            return Ok(PublishOutcome::SchemaDropped);
        }

        let payload = serde_json::to_string(bar)?;

        let mut last_err: Option<BridgeError> = None;
        for attempt in 1..=self.cfg.max_retries.max(1) {
            match self.bus.publish(&self.cfg.topic, &payload).await {
                Ok(()) => {
                    self.metrics.inc_published();
                    if bar.is_closed {
                        self.metrics
                            .maybe_mark_late(&bar.bar_end_ts, self.cfg.late_threshold_secs);
                    }
                    trace!(code = %bar.code, bar_end = %bar.bar_end_ts, closed = bar.is_closed, "bar published");
                    return Ok(PublishOutcome::Published);
                }
                Err(e) => {
                    debug!(
                        code = %bar.code,
                        attempt,
                        max = self.cfg.max_retries,
                        error = %e,
                        "publish attempt failed"
                    );
                    last_err = Some(e);
                    if attempt < self.cfg.max_retries {
                        tokio::time::sleep(self.cfg.backoff).await;
                    }
                }
            }
        }

        self.metrics.inc_publish_fail();
        let err = last_err.unwrap_or_else(|| BridgeError::Bus("publish failed".into()));
        error!(code = %bar.code, topic = %self.cfg.topic, error = %err, "publish retries exhausted");
        Err(err)
    }
}
