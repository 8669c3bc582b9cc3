// =============================================================================
// HealthReporter — periodic heartbeat KV write with TTL
// =============================================================================
//
// Every tick writes `<key_prefix>:<instance_id>` with a JSON record of the
// current metrics snapshot and subscription tags. The TTL lets observers
// detect a dead instance by key expiry. Write failures are swallowed: health
// must never interfere with the data path.
// =============================================================================

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::bus::Bus;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::timefmt;

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub key_prefix: String,
    pub interval_secs: u64,
    pub ttl_secs: u64,
    pub instance_tag: Option<String>,
}

/// The heartbeat payload written to the bus KV.
#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub ts: i64,
    pub instance_id: String,
    pub metrics: MetricsSnapshot,
    pub extra: Value,
}

pub struct HealthReporter {
    bus: Arc<dyn Bus>,
    metrics: Arc<Metrics>,
    key_prefix: String,
    interval_secs: u64,
    ttl_secs: u64,
    extra: Value,
    instance_id: String,
}

impl HealthReporter {
    pub fn new(
        bus: Arc<dyn Bus>,
        metrics: Arc<Metrics>,
        cfg: HealthConfig,
        extra: Value,
    ) -> Self {
        let interval_secs = cfg.interval_secs.max(1);
        // TTL must comfortably outlive the write cadence.
        let ttl_secs = cfg.ttl_secs.max(interval_secs * 2);
        let instance_id = make_instance_id(cfg.instance_tag.as_deref());
        Self {
            bus,
            metrics,
            key_prefix: cfg.key_prefix.trim_end_matches(':').to_string(),
            interval_secs,
            ttl_secs,
            extra,
            instance_id,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.key_prefix, self.instance_id)
    }

    fn record(&self) -> HealthRecord {
        HealthRecord {
            ts: timefmt::now_cn().timestamp(),
            instance_id: self.instance_id.clone(),
            metrics: self.metrics.snapshot(),
            extra: self.extra.clone(),
        }
    }

    /// Write one heartbeat now. Failures are logged at debug and ignored.
    pub async fn write_once(&self) {
        let record = self.record();
        match serde_json::to_string(&record) {
            Ok(body) => {
                if let Err(e) = self.bus.set_with_ttl(&self.key(), &body, self.ttl_secs).await {
                    debug!(error = %e, "health write failed");
                }
            }
            Err(e) => debug!(error = %e, "health record serialization failed"),
        }
    }

    /// Heartbeat loop; exits promptly when `stop` flips.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        info!(key = %self.key(), interval = self.interval_secs, ttl = self.ttl_secs, "health reporter started");
        let period = std::time::Duration::from_secs(self.interval_secs);
        loop {
            self.write_once().await;
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        info!("health reporter stopping");
                        return;
                    }
                }
            }
        }
    }
}

fn make_instance_id(tag: Option<&str>) -> String {
    let host = gethostname::gethostname().to_string_lossy().into_owned();
    let pid = std::process::id();
    match tag {
        Some(tag) if !tag.is_empty() => format!("{host}:{pid}:{tag}"),
        _ => format!("{host}:{pid}"),
    }
}
