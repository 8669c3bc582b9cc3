// =============================================================================
// SubscriptionEngine — active keys, preload-then-activate, event dispatch
// =============================================================================
//
// One mutex guards the whole mutable core (active keys, per-key state
// machines, dedup LRU, last-publish marks). Vendor batches arrive on an mpsc
// channel and are drained by a single dispatch task; emissions are computed
// under the lock, published outside it so network I/O never blocks the
// callback path.
//
// Dedup: closed emissions always pass the fingerprint LRU, so a bar already
// published as closed can never repeat even if its state machine was dropped
// and recreated. Forming updates bypass the LRU — consecutive refinements of
// the same forming bar are distinct messages, not duplicates.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bar_state::{BarStateMachine, PendingBar};
use crate::dedup::{DedupLru, DEFAULT_DEDUP_CAPACITY};
use crate::error::{BridgeError, Result};
use crate::metrics::Metrics;
use crate::publisher::{BarPublisher, PublishOutcome};
use crate::quote::QuoteSource;
use crate::timefmt;
use crate::types::{CanonicalBar, Period, PushMode, RawEvent, SubscriptionKey};

/// Buffered vendor batches before the source blocks.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: PushMode,
    pub default_preload_days: u32,
    pub dedup_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: PushMode::CloseOnly,
            default_preload_days: 3,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

/// Snapshot of one active key for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct KeyStatus {
    pub code: String,
    pub period: Period,
    pub last_pub_ts: Option<String>,
}

/// Engine status: sorted active keys with last-publish wall-clock marks.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub mode: PushMode,
    pub active: Vec<KeyStatus>,
}

struct EngineState {
    active: HashSet<SubscriptionKey>,
    bar_states: HashMap<SubscriptionKey, BarStateMachine>,
    dedup: DedupLru,
    last_pub_ts: HashMap<SubscriptionKey, DateTime<FixedOffset>>,
}

pub struct SubscriptionEngine {
    quote: Arc<dyn QuoteSource>,
    publisher: Arc<BarPublisher>,
    metrics: Arc<Metrics>,
    cfg: EngineConfig,
    state: Mutex<EngineState>,
    event_tx: mpsc::Sender<RawEvent>,
    pending_rx: Mutex<Option<mpsc::Receiver<RawEvent>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionEngine {
    pub fn new(
        quote: Arc<dyn QuoteSource>,
        publisher: Arc<BarPublisher>,
        metrics: Arc<Metrics>,
        cfg: EngineConfig,
    ) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let dedup_capacity = cfg.dedup_capacity;
        Arc::new(Self {
            quote,
            publisher,
            metrics,
            cfg,
            state: Mutex::new(EngineState {
                active: HashSet::new(),
                bar_states: HashMap::new(),
                dedup: DedupLru::new(dedup_capacity),
                last_pub_ts: HashMap::new(),
            }),
            event_tx,
            pending_rx: Mutex::new(Some(event_rx)),
            dispatch: Mutex::new(None),
        })
    }

    pub fn mode(&self) -> PushMode {
        self.cfg.mode
    }

    pub fn default_preload_days(&self) -> u32 {
        self.cfg.default_preload_days
    }

    /// Spawn the dispatch task draining vendor batches. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let Some(mut rx) = self.pending_rx.lock().take() else {
            return;
        };
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                engine.handle_event(event).await;
            }
        });
        *self.dispatch.lock() = Some(handle);
    }

    /// Activate every new (code, period) combination: preload history first,
    /// then register with the vendor. Keys already active are skipped. On a
    /// vendor registration failure the failing key is rolled back and the
    /// error surfaces; previously activated keys stay live.
    pub async fn add_subscription(
        &self,
        codes: &[String],
        periods: &[Period],
        preload_days: u32,
    ) -> Result<()> {
        let new_keys: Vec<SubscriptionKey> = {
            let state = self.state.lock();
            codes
                .iter()
                .flat_map(|c| periods.iter().map(move |p| SubscriptionKey::new(c.clone(), *p)))
                .filter(|k| !state.active.contains(k))
                .collect()
        };
        if new_keys.is_empty() {
            debug!("add_subscription: all keys already active");
            return Ok(());
        }

        if preload_days > 0 {
            let preload_codes: Vec<String> = dedup_preserving(
                new_keys.iter().map(|k| k.code.clone()),
            );
            let preload_periods: Vec<Period> =
                dedup_preserving(new_keys.iter().map(|k| k.period));
            self.quote
                .preload(&preload_codes, &preload_periods, preload_days)
                .await
                .map_err(|e| match e {
                    preload @ BridgeError::Preload(_) => preload,
                    other => BridgeError::Preload(other.to_string()),
                })?;
        }

        for key in &new_keys {
            // Activate before registering so the first callback is not lost;
            // preload has already completed for this key.
            self.state.lock().active.insert(key.clone());
            if let Err(e) = self.quote.subscribe(key, self.event_tx.clone()).await {
                self.state.lock().active.remove(key);
                return Err(BridgeError::Vendor(format!(
                    "subscribe {key} failed: {e}"
                )));
            }
            info!(key = %key, "subscription active");
        }
        Ok(())
    }

    /// Deactivate each named key: vendor unsubscribe, drop its bar state and
    /// last-publish mark. Unknown keys are silently ignored.
    pub async fn remove_subscription(&self, codes: &[String], periods: &[Period]) {
        let keys: Vec<SubscriptionKey> = codes
            .iter()
            .flat_map(|c| periods.iter().map(move |p| SubscriptionKey::new(c.clone(), *p)))
            .collect();

        for key in keys {
            let was_active = self.state.lock().active.remove(&key);
            if !was_active {
                continue;
            }
            if let Err(e) = self.quote.unsubscribe(&key).await {
                warn!(key = %key, error = %e, "vendor unsubscribe failed");
            }
            let mut state = self.state.lock();
            state.bar_states.remove(&key);
            state.last_pub_ts.remove(&key);
            info!(key = %key, "subscription removed");
        }
    }

    /// Sorted snapshot of the active key set.
    pub fn status(&self) -> EngineStatus {
        let state = self.state.lock();
        let mut active: Vec<KeyStatus> = state
            .active
            .iter()
            .map(|k| KeyStatus {
                code: k.code.clone(),
                period: k.period,
                last_pub_ts: state.last_pub_ts.get(k).map(|dt| timefmt::format_ts(*dt)),
            })
            .collect();
        active.sort_by(|a, b| (&a.code, a.period).cmp(&(&b.code, b.period)));
        EngineStatus {
            mode: self.cfg.mode,
            active,
        }
    }

    /// Process one vendor batch: normalize, order, run the state machines,
    /// gate by mode, dedup, then publish outside the lock.
    pub async fn handle_event(&self, event: RawEvent) {
        let mut to_publish: Vec<(SubscriptionKey, CanonicalBar)> = Vec::new();

        {
            let mut state = self.state.lock();
            for (code, rows) in &event.batch {
                let key = SubscriptionKey::new(code.clone(), event.period);
                if !state.active.contains(&key) {
                    continue;
                }

                let mut pendings: Vec<PendingBar> = rows
                    .iter()
                    .filter_map(|row| match PendingBar::from_raw(row) {
                        Ok(p) => Some(p),
                        Err(e) => {
                            debug!(key = %key, error = %e, "dropping unparseable row");
                            None
                        }
                    })
                    .collect();
                pendings.sort_by_key(|p| p.end);

                let emitted: Vec<CanonicalBar> = {
                    let machine = state
                        .bar_states
                        .entry(key.clone())
                        .or_insert_with(|| BarStateMachine::new(code.clone(), event.period));
                    pendings
                        .into_iter()
                        .flat_map(|p| machine.on_bar(p))
                        .collect()
                };

                for bar in emitted {
                    if self.cfg.mode == PushMode::CloseOnly && !bar.is_closed {
                        continue;
                    }
                    if bar.is_closed {
                        let fp = fingerprint(&bar, self.cfg.mode);
                        if state.dedup.check_and_insert(&fp) {
                            self.metrics.inc_dedup_hit();
                            continue;
                        }
                    }
                    to_publish.push((key.clone(), bar));
                }
            }
        }

        for (key, bar) in to_publish {
            match self.publisher.publish_bar(&bar).await {
                Ok(PublishOutcome::Published) => {
                    self.state
                        .lock()
                        .last_pub_ts
                        .insert(key, timefmt::now_cn());
                }
                Ok(PublishOutcome::SchemaDropped) => {}
                Err(e) => {
                    // Fatal for this bar only; the stream continues.
                    error!(key = %key, error = %e, "bar dropped after publish retries");
                }
            }
        }
    }

    /// Tear down: vendor unsubscribes everything and the dispatch task ends.
    pub async fn stop(&self) {
        if let Err(e) = self.quote.unsubscribe_all().await {
            warn!(error = %e, "vendor unsubscribe_all failed");
        }
        self.state.lock().active.clear();
        if let Some(handle) = self.dispatch.lock().take() {
            handle.abort();
        }
    }
}

fn fingerprint(bar: &CanonicalBar, mode: PushMode) -> String {
    match mode {
        PushMode::CloseOnly => {
            format!("{}|{}|{}", bar.code, bar.period, bar.bar_end_ts)
        }
        PushMode::FormingAndClose => format!(
            "{}|{}|{}|{}",
            bar.code, bar.period, bar.bar_end_ts, bar.is_closed
        ),
    }
}

fn dedup_preserving<T: Clone + Eq + std::hash::Hash>(items: impl Iterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items.filter(|i| seen.insert(i.clone())).collect()
}
