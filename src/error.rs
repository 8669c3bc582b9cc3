// =============================================================================
// Bridge error kinds
// =============================================================================

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Every failure class the bridge distinguishes. Startup aborts on `Config`
/// and `VendorUnavailable`; everything else is handled at the call site per
/// the propagation policy (retry, rollback-and-NACK, or swallow-and-count).
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("vendor unavailable: {0}")]
    VendorUnavailable(String),

    #[error("vendor error: {0}")]
    Vendor(String),

    #[error("preload failed: {0}")]
    Preload(String),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("registry conflict: {0}")]
    RegistryConflict(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl From<redis::RedisError> for BridgeError {
    fn from(e: redis::RedisError) -> Self {
        Self::Bus(e.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}
