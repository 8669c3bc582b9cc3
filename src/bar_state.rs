// =============================================================================
// BarStateMachine — forming/close reconciliation for one (code, period)
// =============================================================================
//
// The vendor's own close flag is inconsistent across sites and products, so
// closure is derived from timestamp advancement instead: a bar is closed the
// moment a strictly later bar_end_ts arrives on the same key. The machine is
// mode-agnostic — it always emits forming updates and leaves close_only
// gating to the dispatcher — which keeps it directly unit-testable with
// synthetic sequences.
//
// Transition table, for current end-ts D* and last published close L:
//
//   first event        -> adopt; emit forming
//   bar_dt <  D*       -> drop (silently when <= L, logged otherwise)
//   bar_dt == D*       -> replace payload (later update wins); emit forming
//   bar_dt >  D*       -> emit current as closed, advance L; adopt; emit forming
// =============================================================================

use chrono::{DateTime, FixedOffset};
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::timefmt;
use crate::types::{
    raw_f64, raw_open_interest, raw_pre_close, raw_settlement_price, raw_source,
    raw_suspend_flag, raw_time, CanonicalBar, Period, RawRow,
};

/// A vendor row normalized at ingress: aliases resolved, time parsed.
#[derive(Debug, Clone)]
pub struct PendingBar {
    pub end: DateTime<FixedOffset>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub amount: Option<f64>,
    pub pre_close: Option<f64>,
    pub suspend_flag: Option<i64>,
    pub open_interest: Option<f64>,
    pub settlement_price: Option<f64>,
    pub source: Option<String>,
}

impl PendingBar {
    /// Normalize a raw vendor row. An absent or unparseable time field fails
    /// the whole row; sparse price fields stay `None`.
    pub fn from_raw(row: &RawRow) -> Result<Self> {
        let time = raw_time(row)
            .ok_or_else(|| BridgeError::Parse("row has no recognizable time field".into()))?;
        let end = timefmt::parse_bar_end(time)?;
        Ok(Self {
            end,
            open: raw_f64(row, "open"),
            high: raw_f64(row, "high"),
            low: raw_f64(row, "low"),
            close: raw_f64(row, "close"),
            volume: raw_f64(row, "volume"),
            amount: raw_f64(row, "amount"),
            pre_close: raw_pre_close(row),
            suspend_flag: raw_suspend_flag(row),
            open_interest: raw_open_interest(row),
            settlement_price: raw_settlement_price(row),
            source: raw_source(row),
        })
    }
}

/// Per-key reconciliation state.
#[derive(Debug)]
pub struct BarStateMachine {
    code: String,
    period: Period,
    current: Option<PendingBar>,
    last_published: Option<DateTime<FixedOffset>>,
}

impl BarStateMachine {
    pub fn new(code: impl Into<String>, period: Period) -> Self {
        Self {
            code: code.into(),
            period,
            current: None,
            last_published: None,
        }
    }

    /// High-water mark of emitted closed bars.
    pub fn last_published_dt(&self) -> Option<DateTime<FixedOffset>> {
        self.last_published
    }

    /// Feed one normalized payload; returns the bars to emit, in order.
    /// At most two: a closed bar finalizing the previous period, then the
    /// forming update for the incoming one.
    pub fn on_bar(&mut self, incoming: PendingBar) -> Vec<CanonicalBar> {
        let mut out = Vec::with_capacity(2);

        match &self.current {
            None => {
                out.push(self.to_canonical(&incoming, false));
                self.current = Some(incoming);
            }
            Some(current) if incoming.end < current.end => {
                // Out-of-order. Anything at or before the high-water mark is
                // a replay after reconnection and drops silently.
                if self
                    .last_published
                    .is_some_and(|last| incoming.end <= last)
                {
                    debug!(
                        code = %self.code,
                        period = %self.period,
                        bar_end = %timefmt::format_ts(incoming.end),
                        "dropping replayed bar at or before high-water mark"
                    );
                } else {
                    warn!(
                        code = %self.code,
                        period = %self.period,
                        bar_end = %timefmt::format_ts(incoming.end),
                        current = %timefmt::format_ts(current.end),
                        "dropping out-of-order bar"
                    );
                }
            }
            Some(current) if incoming.end == current.end => {
                out.push(self.to_canonical(&incoming, false));
                self.current = Some(incoming);
            }
            Some(current) => {
                // Timestamp advanced: the previous bar is final.
                out.push(self.to_canonical(current, true));
                self.last_published = Some(current.end);
                out.push(self.to_canonical(&incoming, false));
                self.current = Some(incoming);
            }
        }

        out
    }

    fn to_canonical(&self, p: &PendingBar, is_closed: bool) -> CanonicalBar {
        CanonicalBar {
            code: self.code.clone(),
            period: self.period,
            bar_open_ts: timefmt::format_ts(timefmt::bar_open(p.end, self.period)),
            bar_end_ts: timefmt::format_ts(p.end),
            is_closed,
            open: p.open,
            high: p.high,
            low: p.low,
            close: p.close,
            volume: p.volume,
            amount: p.amount,
            pre_close: p.pre_close,
            suspend_flag: p.suspend_flag,
            open_interest: p.open_interest,
            settlement_price: p.settlement_price,
            dividend_type: None,
            source: p.source.clone().unwrap_or_else(|| "qmt".to_string()),
            recv_ts: timefmt::format_ts(timefmt::now_cn()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending(ts: &str, close: f64) -> PendingBar {
        let row: RawRow = [
            ("time".to_string(), json!(ts)),
            ("open".to_string(), json!(close - 0.01)),
            ("high".to_string(), json!(close + 0.01)),
            ("low".to_string(), json!(close - 0.02)),
            ("close".to_string(), json!(close)),
            ("volume".to_string(), json!(1000.0)),
            ("amount".to_string(), json!(2500.0)),
        ]
        .into_iter()
        .collect();
        PendingBar::from_raw(&row).unwrap()
    }

    #[test]
    fn first_event_emits_forming_only() {
        let mut sm = BarStateMachine::new("510050.SH", Period::M1);
        let out = sm.on_bar(pending("2025-09-17 09:31:00", 2.515));
        assert_eq!(out.len(), 1);
        assert!(!out[0].is_closed);
        assert_eq!(out[0].bar_end_ts, "2025-09-17T09:31:00+08:00");
        assert_eq!(out[0].bar_open_ts, "2025-09-17T09:30:00+08:00");
        assert_eq!(out[0].code, "510050.SH");
        assert_eq!(out[0].source, "qmt");
        assert!(sm.last_published_dt().is_none());
    }

    #[test]
    fn same_timestamp_replaces_payload() {
        let mut sm = BarStateMachine::new("510050.SH", Period::M1);
        sm.on_bar(pending("2025-09-17 09:31:00", 2.510));
        let out = sm.on_bar(pending("2025-09-17 09:31:00", 2.515));
        assert_eq!(out.len(), 1);
        assert!(!out[0].is_closed);
        assert_eq!(out[0].close, Some(2.515));
    }

    #[test]
    fn advancement_closes_previous_bar() {
        let mut sm = BarStateMachine::new("510050.SH", Period::M1);
        sm.on_bar(pending("2025-09-17 09:31:00", 2.515));
        let out = sm.on_bar(pending("2025-09-17 09:32:00", 2.520));

        assert_eq!(out.len(), 2);
        assert!(out[0].is_closed);
        assert_eq!(out[0].bar_end_ts, "2025-09-17T09:31:00+08:00");
        assert_eq!(out[0].close, Some(2.515));
        assert!(!out[1].is_closed);
        assert_eq!(out[1].bar_end_ts, "2025-09-17T09:32:00+08:00");
        assert_eq!(
            timefmt::format_ts(sm.last_published_dt().unwrap()),
            "2025-09-17T09:31:00+08:00"
        );
    }

    #[test]
    fn forming_and_close_sequence_matches_contract() {
        // Duplicate forming update, then advancement: forming, forming,
        // closed(previous), forming(new).
        let mut sm = BarStateMachine::new("510050.SH", Period::M1);
        let mut all = Vec::new();
        all.extend(sm.on_bar(pending("2025-09-17 09:31:00", 2.510)));
        all.extend(sm.on_bar(pending("2025-09-17 09:31:00", 2.515)));
        all.extend(sm.on_bar(pending("2025-09-17 09:32:00", 2.520)));

        let seq: Vec<(bool, Option<f64>)> =
            all.iter().map(|b| (b.is_closed, b.close)).collect();
        assert_eq!(
            seq,
            vec![
                (false, Some(2.510)),
                (false, Some(2.515)),
                (true, Some(2.515)),
                (false, Some(2.520)),
            ]
        );
    }

    #[test]
    fn out_of_order_is_dropped_without_state_change() {
        let mut sm = BarStateMachine::new("510050.SH", Period::M1);
        sm.on_bar(pending("2025-09-17 09:31:00", 2.515));
        sm.on_bar(pending("2025-09-17 09:32:00", 2.520));

        // Older than the high-water mark: replay, dropped.
        let out = sm.on_bar(pending("2025-09-17 09:30:00", 2.500));
        assert!(out.is_empty());

        // The forming bar is untouched and still closes normally.
        let out = sm.on_bar(pending("2025-09-17 09:33:00", 2.530));
        assert_eq!(out[0].bar_end_ts, "2025-09-17T09:32:00+08:00");
        assert!(out[0].is_closed);
    }

    #[test]
    fn closed_emissions_are_strictly_monotonic() {
        let mut sm = BarStateMachine::new("510050.SH", Period::M1);
        let feed = [
            "2025-09-17 09:31:00",
            "2025-09-17 09:32:00",
            "2025-09-17 09:31:00", // replay
            "2025-09-17 09:33:00",
            "2025-09-17 09:32:00", // replay
            "2025-09-17 09:34:00",
        ];
        let mut closed = Vec::new();
        for ts in feed {
            for bar in sm.on_bar(pending(ts, 1.0)) {
                if bar.is_closed {
                    closed.push(bar.bar_end_ts);
                }
            }
        }
        let mut sorted = closed.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(closed, sorted);
        assert_eq!(closed.len(), 3);
    }

    #[test]
    fn vendor_source_tag_is_preserved() {
        let mut sm = BarStateMachine::new("MOCK.SH", Period::M1);
        let row: RawRow = [
            ("time".to_string(), json!("2025-09-17 09:31:00")),
            ("close".to_string(), json!(10.0)),
            ("source".to_string(), json!("mock")),
        ]
        .into_iter()
        .collect();
        let out = sm.on_bar(PendingBar::from_raw(&row).unwrap());
        assert_eq!(out[0].source, "mock");
        // Sparse fields stay None.
        assert_eq!(out[0].open, None);
    }

    #[test]
    fn row_without_time_fails_normalization() {
        let row: RawRow = [("close".to_string(), json!(1.0))].into_iter().collect();
        assert!(PendingBar::from_raw(&row).is_err());
    }
}
