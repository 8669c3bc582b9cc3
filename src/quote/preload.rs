// =============================================================================
// Preload planning — date windows and chunking for history downloads
// =============================================================================
//
// Vendors ingest history per date range; large ranges are split into chunks
// so a single failed download does not restart the whole backfill. Adapters
// retry each chunk and surface PreloadError once retries are exhausted.
// =============================================================================

use chrono::{Duration, NaiveDate};

use crate::timefmt;

/// Days covered by one download request.
pub const DATE_CHUNK_DAYS: i64 = 60;

/// The inclusive (start, end) date window for a preload of `days` days,
/// ending today in Asia/Shanghai.
pub fn preload_window(days: u32) -> (NaiveDate, NaiveDate) {
    let end = timefmt::now_cn().date_naive();
    let start = end - Duration::days(i64::from(days.max(1)) - 1);
    (start, end)
}

/// Split an inclusive date range into inclusive chunks of at most
/// `chunk_days` days each, in ascending order.
pub fn chunk_date_range(
    start: NaiveDate,
    end: NaiveDate,
    chunk_days: i64,
) -> Vec<(NaiveDate, NaiveDate)> {
    let mut chunks = Vec::new();
    if end < start {
        return chunks;
    }
    let step = Duration::days(chunk_days.max(1));
    let mut cursor = start;
    while cursor <= end {
        let chunk_end = (cursor + step - Duration::days(1)).min(end);
        chunks.push((cursor, chunk_end));
        cursor = chunk_end + Duration::days(1);
    }
    chunks
}
