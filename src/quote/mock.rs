// =============================================================================
// MockFeeder — synthetic random-walk quote source (test/demo)
// =============================================================================
//
// Stands in for the vendor when no market connection is available: every
// subscribed key gets a generator task that random-walks a price at a
// configured cadence and emits rows for the bar currently forming. Bar ends
// align to real period boundaries, so the downstream state machine closes
// bars exactly as it would on live data.
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::Result;
use crate::quote::{preload, EventSink, QuoteSource};
use crate::timefmt;
use crate::types::{Period, RawEvent, RawRow, SubscriptionKey};

/// Tuning for the synthetic feed; mirrors the `mock` config section.
#[derive(Debug, Clone)]
pub struct MockFeederConfig {
    pub base_price: f64,
    pub volatility: f64,
    pub step_seconds: f64,
    pub seed: Option<u64>,
    pub volume_mean: f64,
    pub volume_std: f64,
    pub source: String,
}

impl Default for MockFeederConfig {
    fn default() -> Self {
        Self {
            base_price: 10.0,
            volatility: 0.002,
            step_seconds: 1.0,
            seed: None,
            volume_mean: 1_000_000.0,
            volume_std: 200_000.0,
            source: "mock".to_string(),
        }
    }
}

pub struct MockFeeder {
    cfg: MockFeederConfig,
    tasks: Mutex<HashMap<SubscriptionKey, JoinHandle<()>>>,
    preload_calls: Mutex<Vec<(Vec<String>, Vec<Period>, u32)>>,
}

impl MockFeeder {
    pub fn new(cfg: MockFeederConfig) -> Self {
        Self {
            cfg,
            tasks: Mutex::new(HashMap::new()),
            preload_calls: Mutex::new(Vec::new()),
        }
    }

    /// Preload invocations observed so far (codes, periods, days).
    pub fn preload_calls(&self) -> Vec<(Vec<String>, Vec<Period>, u32)> {
        self.preload_calls.lock().clone()
    }

    fn rng_for(&self, key: &SubscriptionKey) -> ChaCha8Rng {
        match self.cfg.seed {
            Some(seed) => {
                use std::hash::{Hash, Hasher};
                // Per-key stream offset keeps seeded runs reproducible while
                // decorrelating symbols.
                let mut h = std::collections::hash_map::DefaultHasher::new();
                key.hash(&mut h);
                ChaCha8Rng::seed_from_u64(seed ^ h.finish())
            }
            None => ChaCha8Rng::from_entropy(),
        }
    }
}

/// End timestamp of the bar containing `now` for the given period, aligned
/// on Asia/Shanghai local boundaries (daily bars end at local midnight).
pub fn forming_bar_end(now: DateTime<FixedOffset>, period: Period) -> DateTime<FixedOffset> {
    let len = period.length_secs();
    let local_secs = now.timestamp() + 8 * 3600;
    let end_local = (local_secs.div_euclid(len) + 1) * len;
    DateTime::from_timestamp(end_local - 8 * 3600, 0)
        .expect("aligned bar end within range")
        .with_timezone(&timefmt::cn_tz())
}

/// One step of a geometric random walk.
struct WalkState {
    price: f64,
    bar_end: Option<DateTime<FixedOffset>>,
    open: f64,
    high: f64,
    low: f64,
    volume: f64,
}

impl WalkState {
    fn new(base_price: f64) -> Self {
        Self {
            price: base_price,
            bar_end: None,
            open: base_price,
            high: base_price,
            low: base_price,
            volume: 0.0,
        }
    }

    fn step(&mut self, rng: &mut ChaCha8Rng, cfg: &MockFeederConfig, period: Period) -> RawRow {
        let now = timefmt::now_cn();
        let end = forming_bar_end(now, period);

        let shock: f64 = rng.gen_range(-1.0..1.0) * cfg.volatility;
        self.price = (self.price * shock.exp()).max(0.0001);

        if self.bar_end != Some(end) {
            // New bar: reset the OHLC accumulation.
            self.bar_end = Some(end);
            self.open = self.price;
            self.high = self.price;
            self.low = self.price;
            self.volume = 0.0;
        }
        self.high = self.high.max(self.price);
        self.low = self.low.min(self.price);

        let tick_volume =
            (cfg.volume_mean + rng.gen_range(-1.0..1.0) * cfg.volume_std).max(0.0);
        self.volume += tick_volume;

        let mut row = RawRow::new();
        row.insert("time".into(), json!(timefmt::format_ts(end)));
        row.insert("open".into(), json!(self.open));
        row.insert("high".into(), json!(self.high));
        row.insert("low".into(), json!(self.low));
        row.insert("close".into(), json!(self.price));
        row.insert("volume".into(), json!(self.volume));
        row.insert("amount".into(), json!(self.volume * self.price));
        row.insert("source".into(), json!(cfg.source));
        row
    }
}

#[async_trait]
impl QuoteSource for MockFeeder {
    async fn preload(&self, codes: &[String], periods: &[Period], days: u32) -> Result<()> {
        self.preload_calls
            .lock()
            .push((codes.to_vec(), periods.to_vec(), days));
        // Walk the same chunk plan a real adapter would download.
        let (start, end) = preload::preload_window(days);
        for (chunk_start, chunk_end) in
            preload::chunk_date_range(start, end, preload::DATE_CHUNK_DAYS)
        {
            debug!(
                codes = codes.len(),
                ?periods,
                %chunk_start,
                %chunk_end,
                "mock preload chunk (no-op)"
            );
        }
        Ok(())
    }

    async fn subscribe(&self, key: &SubscriptionKey, sink: EventSink) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(key) {
            return Ok(());
        }

        let cfg = self.cfg.clone();
        let mut rng = self.rng_for(key);
        let key_owned = key.clone();
        let handle = tokio::spawn(async move {
            let step = cfg.step_seconds.max(0.01);
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs_f64(step));
            let mut walk = WalkState::new(cfg.base_price);
            loop {
                ticker.tick().await;
                let row = walk.step(&mut rng, &cfg, key_owned.period);
                let mut batch = HashMap::new();
                batch.insert(key_owned.code.clone(), vec![row]);
                let event = RawEvent {
                    period: key_owned.period,
                    batch,
                };
                if sink.send(event).await.is_err() {
                    // Engine went away; the feed stops with it.
                    return;
                }
            }
        });
        tasks.insert(key.clone(), handle);
        info!(key = %key, "mock feed started");
        Ok(())
    }

    async fn unsubscribe(&self, key: &SubscriptionKey) -> Result<()> {
        if let Some(handle) = self.tasks.lock().remove(key) {
            handle.abort();
            info!(key = %key, "mock feed stopped");
        }
        Ok(())
    }

    async fn unsubscribe_all(&self) -> Result<()> {
        let mut tasks = self.tasks.lock();
        for (key, handle) in tasks.drain() {
            handle.abort();
            debug!(key = %key, "mock feed stopped");
        }
        Ok(())
    }
}
