// =============================================================================
// QuoteSource — vendor capability seam
// =============================================================================
//
// The vendor quote library lives behind this trait: history preload,
// per-key realtime registration, and teardown. Raw batches are delivered
// into an mpsc sink owned by the engine, so the vendor's dispatch threads
// never touch engine internals directly.
// =============================================================================

pub mod mock;
pub mod preload;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{Period, RawEvent, SubscriptionKey};

/// Where a quote source delivers its raw batches.
pub type EventSink = mpsc::Sender<RawEvent>;

#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Download history for `codes` x `periods` covering the last `days`
    /// days. Idempotent and internally chunked/retried; returns only once
    /// the download settled so realtime activation can follow immediately.
    async fn preload(&self, codes: &[String], periods: &[Period], days: u32) -> Result<()>;

    /// Start delivering raw batches for `key` into `sink`.
    async fn subscribe(&self, key: &SubscriptionKey, sink: EventSink) -> Result<()>;

    /// Stop deliveries for `key`. Unknown keys are a no-op.
    async fn unsubscribe(&self, key: &SubscriptionKey) -> Result<()>;

    /// Drop every registration (shutdown path).
    async fn unsubscribe_all(&self) -> Result<()>;
}
