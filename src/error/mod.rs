//! Error types for the charging control engine.
//!
//! Everything in this crate is best-effort: a failed hardware call is logged
//! and absorbed at the evaluation loop, never propagated past the crate
//! boundary. The variants here exist so call sites can distinguish a
//! rejected input from a transient hardware fault.

use thiserror::Error;

/// Result type alias for charging control operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A call into the hardware charging-control service failed
    #[error("Hardware service error: {0}")]
    Hal(String),

    /// The requested operation is not available on the active strategy,
    /// or no strategy is supported at all
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A configuration value was rejected at the setter boundary
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings-store persistence failure
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Retry strategies for transient hardware-service failures
#[derive(Debug, Clone, Copy)]
pub enum RetryStrategy {
    NoRetry,
    ExponentialBackoff { max_retries: u32, base_delay_ms: u64 },
}

impl RetryStrategy {
    /// Number of attempts this strategy allows, including the first one
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::NoRetry => 1,
            Self::ExponentialBackoff { max_retries, .. } => max_retries + 1,
        }
    }

    /// Delay before the given retry (1-based), if any
    pub fn delay_before(&self, retry: u32) -> Option<std::time::Duration> {
        match self {
            Self::NoRetry => None,
            Self::ExponentialBackoff { base_delay_ms, .. } => Some(
                std::time::Duration::from_millis(base_delay_ms.saturating_mul(1 << (retry - 1))),
            ),
        }
    }
}
