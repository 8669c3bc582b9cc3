// =============================================================================
// SchemaGuard — outbound wire-contract validation
// =============================================================================
//
// Contract: code/period/bar_end_ts/is_closed/open/high/low/close present,
// is_closed must be true under close_only, and bar_end_ts must be an
// Asia/Shanghai string (ends in "+08:00", contains 'T' or a space).
// Violations drop the bar; they never halt the stream.
// =============================================================================

use crate::error::{BridgeError, Result};
use crate::types::{CanonicalBar, PushMode};

fn is_plus8(ts: &str) -> bool {
    ts.ends_with("+08:00") && (ts.contains('T') || ts.contains(' '))
}

/// Validate one outbound bar against the wire contract.
pub fn validate_bar(bar: &CanonicalBar, mode: PushMode) -> Result<()> {
    if bar.code.trim().is_empty() {
        return Err(BridgeError::SchemaViolation("empty code".into()));
    }

    for (name, value) in [
        ("open", bar.open),
        ("high", bar.high),
        ("low", bar.low),
        ("close", bar.close),
    ] {
        if value.is_none() {
            return Err(BridgeError::SchemaViolation(format!(
                "missing required field: {name}"
            )));
        }
    }

    if mode == PushMode::CloseOnly && !bar.is_closed {
        return Err(BridgeError::SchemaViolation(
            "close_only requires is_closed=true".into(),
        ));
    }

    if !is_plus8(&bar.bar_end_ts) {
        return Err(BridgeError::SchemaViolation(format!(
            "bar_end_ts is not a +08:00 timestamp: {}",
            bar.bar_end_ts
        )));
    }

    Ok(())
}
