// =============================================================================
// Timestamp normalization — everything becomes Asia/Shanghai (+08:00)
// =============================================================================
//
// The vendor time field arrives in half a dozen shapes depending on site,
// product, and API version:
//
//   (i)   integer epoch seconds
//   (ii)  integer epoch milliseconds (magnitude >= 1e12)
//   (iii) 14-digit YYYYMMDDhhmmss
//   (iv)  8-digit YYYYMMDD (daily bars, midnight +08:00)
//   (v)   "YYYY-MM-DD HH:MM:SS" or "YYYYMMDD HH:MM:SS", assumed +08:00
//   (vi)  ISO-8601 with Z or an explicit offset
//
// All of them normalize into a `DateTime<FixedOffset>` pinned to +08:00.
// Unparseable inputs are an error; the caller drops the row.
// =============================================================================

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::{BridgeError, Result};
use crate::types::Period;

/// Asia/Shanghai fixed offset (UTC+08:00, no DST).
pub fn cn_tz() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("+08:00 is a valid offset")
}

/// Current wall clock in Asia/Shanghai.
pub fn now_cn() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&cn_tz())
}

/// Render a normalized instant as the wire string `YYYY-MM-DDTHH:MM:SS+08:00`.
pub fn format_ts(dt: DateTime<FixedOffset>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

/// Derive `bar_open_ts` from `bar_end_ts` and the period length. Daily bars
/// use plain midnight-aligned arithmetic; no exchange-session alignment.
pub fn bar_open(end: DateTime<FixedOffset>, period: Period) -> DateTime<FixedOffset> {
    end - chrono::Duration::seconds(period.length_secs())
}

/// Normalize a raw vendor time value into an Asia/Shanghai instant.
pub fn parse_bar_end(value: &serde_json::Value) -> Result<DateTime<FixedOffset>> {
    match value {
        serde_json::Value::Number(n) => {
            let ts = n
                .as_f64()
                .ok_or_else(|| BridgeError::Parse(format!("non-finite time value: {n}")))?;
            parse_numeric(ts)
        }
        serde_json::Value::String(s) => parse_time_str(s.trim()),
        other => Err(BridgeError::Parse(format!(
            "unsupported time value type: {other}"
        ))),
    }
}

fn parse_numeric(ts: f64) -> Result<DateTime<FixedOffset>> {
    if !ts.is_finite() || ts < 0.0 {
        return Err(BridgeError::Parse(format!("invalid numeric time: {ts}")));
    }
    if ts >= 1e12 {
        // Epoch milliseconds.
        DateTime::from_timestamp_millis(ts as i64)
            .map(|dt| dt.with_timezone(&cn_tz()))
            .ok_or_else(|| BridgeError::Parse(format!("epoch millis out of range: {ts}")))
    } else if ts >= 1e9 {
        // Epoch seconds.
        DateTime::from_timestamp(ts as i64, 0)
            .map(|dt| dt.with_timezone(&cn_tz()))
            .ok_or_else(|| BridgeError::Parse(format!("epoch seconds out of range: {ts}")))
    } else {
        // Small integers are compact dates (YYYYMMDD).
        parse_time_str(&format!("{:08}", ts as i64))
    }
}

fn parse_time_str(s: &str) -> Result<DateTime<FixedOffset>> {
    if s.is_empty() {
        return Err(BridgeError::Parse("empty time string".into()));
    }

    // 14-digit YYYYMMDDhhmmss.
    if s.len() == 14 && s.bytes().all(|b| b.is_ascii_digit()) {
        let naive = NaiveDateTime::parse_from_str(s, "%Y%m%d%H%M%S")
            .map_err(|e| BridgeError::Parse(format!("bad compact datetime {s}: {e}")))?;
        return localize(naive);
    }

    // 8-digit YYYYMMDD, midnight +08:00.
    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        let date = NaiveDate::parse_from_str(s, "%Y%m%d")
            .map_err(|e| BridgeError::Parse(format!("bad compact date {s}: {e}")))?;
        let naive = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| BridgeError::Parse(format!("bad compact date {s}")))?;
        return localize(naive);
    }

    // "YYYYMMDD HH:MM:SS" (seen in live vendor callbacks).
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y%m%d %H:%M:%S") {
        return localize(naive);
    }

    // Full ISO-8601 with Z or an explicit offset.
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&cn_tz()));
    }

    // Space-separated variants, with or without an offset.
    let unified = s.replacen(' ', "T", 1);
    if let Ok(dt) = DateTime::parse_from_rfc3339(&unified) {
        return Ok(dt.with_timezone(&cn_tz()));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&unified, "%Y-%m-%dT%H:%M:%S") {
        return localize(naive);
    }

    Err(BridgeError::Parse(format!("unparseable time string: {s}")))
}

fn localize(naive: NaiveDateTime) -> Result<DateTime<FixedOffset>> {
    cn_tz()
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| BridgeError::Parse(format!("ambiguous local time: {naive}")))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> String {
        format_ts(parse_bar_end(&v).unwrap())
    }

    #[test]
    fn epoch_seconds() {
        // 2023-11-14T22:13:20Z == 2023-11-15T06:13:20+08:00
        assert_eq!(parse(json!(1_700_000_000)), "2023-11-15T06:13:20+08:00");
    }

    #[test]
    fn epoch_milliseconds() {
        assert_eq!(parse(json!(1_700_000_000_000i64)), "2023-11-15T06:13:20+08:00");
    }

    #[test]
    fn compact_datetime_14() {
        assert_eq!(parse(json!("20250917093100")), "2025-09-17T09:31:00+08:00");
    }

    #[test]
    fn compact_date_8_is_midnight() {
        assert_eq!(parse(json!("20250917")), "2025-09-17T00:00:00+08:00");
        // Numeric YYYYMMDD takes the same path.
        assert_eq!(parse(json!(20250917)), "2025-09-17T00:00:00+08:00");
    }

    #[test]
    fn space_separated_assumed_cn() {
        assert_eq!(
            parse(json!("2025-09-17 09:31:00")),
            "2025-09-17T09:31:00+08:00"
        );
        assert_eq!(
            parse(json!("20250101 09:31:00")),
            "2025-01-01T09:31:00+08:00"
        );
    }

    #[test]
    fn iso_with_zulu_converts_offset() {
        assert_eq!(
            parse(json!("2025-09-17T01:31:00Z")),
            "2025-09-17T09:31:00+08:00"
        );
    }

    #[test]
    fn iso_with_offset_converts() {
        assert_eq!(
            parse(json!("2025-09-17T02:31:00+01:00")),
            "2025-09-17T09:31:00+08:00"
        );
        // Already +08:00 stays put.
        assert_eq!(
            parse(json!("2025-09-17T09:31:00+08:00")),
            "2025-09-17T09:31:00+08:00"
        );
    }

    #[test]
    fn parse_format_reparse_is_stable() {
        let first = parse_bar_end(&json!("2025-09-17 09:31:00")).unwrap();
        let second = parse_bar_end(&json!(format_ts(first))).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unparseable_inputs_error() {
        assert!(parse_bar_end(&json!("not-a-time")).is_err());
        assert!(parse_bar_end(&json!("")).is_err());
        assert!(parse_bar_end(&json!(null)).is_err());
        assert!(parse_bar_end(&json!(true)).is_err());
        assert!(parse_bar_end(&json!(-5)).is_err());
    }

    #[test]
    fn bar_open_derivation() {
        let end = parse_bar_end(&json!("2025-09-17T09:31:00+08:00")).unwrap();
        assert_eq!(format_ts(bar_open(end, Period::M1)), "2025-09-17T09:30:00+08:00");
        assert_eq!(format_ts(bar_open(end, Period::H1)), "2025-09-17T08:31:00+08:00");

        let daily = parse_bar_end(&json!("20250917")).unwrap();
        assert_eq!(format_ts(bar_open(daily, Period::D1)), "2025-09-16T00:00:00+08:00");
    }
}
