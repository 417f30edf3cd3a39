//! Error taxonomy shared across the workspace.

use thiserror::Error;

/// Errors surfaced by venue adapters, routing, and position handling.
///
/// Adapter-local errors (transport, decode) stay local: the adapter logs,
/// counts, and continues. Position and order errors are terminal for the
/// position they belong to. Nothing in here panics the process.
#[derive(Debug, Error)]
pub enum ArbError {
    /// Transport-level failure (socket closed, REST 5xx).
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or invariant-violating frame; the data point is dropped.
    #[error("decode error: {0}")]
    Decode(String),

    /// Venue throttled the request; the caller should retry with backoff.
    #[error("rate limited by {venue}")]
    RateLimited {
        /// Venue that returned the throttle response.
        venue: String,
    },

    /// Trading call attempted without credentials.
    #[error("not authenticated for trading on {venue}")]
    NotAuthenticated {
        /// Venue missing credentials.
        venue: String,
    },

    /// Order book is shallower than the requested size.
    #[error("insufficient liquidity for {symbol}: {remaining} unfilled")]
    InsufficientLiquidity {
        /// Symbol being sized.
        symbol: String,
        /// Unfillable remainder.
        remaining: rust_decimal::Decimal,
    },

    /// Opportunity rejected by the risk gate.
    #[error("risk rejected: {reason}")]
    RiskRejected {
        /// Which rule fired.
        reason: String,
    },

    /// Venue rejected an order submission.
    #[error("order rejected on {venue}: {reason}")]
    OrderRejected {
        /// Venue that rejected.
        venue: String,
        /// Venue-reported reason.
        reason: String,
    },

    /// A deadline elapsed (connect, ack, or terminal wait).
    #[error("timeout: {0}")]
    Timeout(String),

    /// Paired legs could not be equalized; residual exposure remains.
    #[error("reconciliation failed for position {position_id}: {detail}")]
    ReconciliationFailed {
        /// Position left with residual exposure.
        position_id: String,
        /// What could not be equalized.
        detail: String,
    },

    /// The venue connection dropped mid-operation.
    #[error("venue disconnected: {0}")]
    VenueDisconnected(String),

    /// Operator requested shutdown; close-all then stop.
    #[error("shutdown requested")]
    ShutdownRequested,
}

impl ArbError {
    /// Returns true if the caller may retry after backing off.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::RateLimited { .. } | Self::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = ArbError::RateLimited {
            venue: "Bybit".to_string(),
        };
        assert_eq!(err.to_string(), "rate limited by Bybit");

        let err = ArbError::RiskRejected {
            reason: "cooldown".to_string(),
        };
        assert_eq!(err.to_string(), "risk rejected: cooldown");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ArbError::Transport("reset".to_string()).is_retryable());
        assert!(ArbError::Timeout("ack".to_string()).is_retryable());
        assert!(!ArbError::ShutdownRequested.is_retryable());
        assert!(!ArbError::NotAuthenticated {
            venue: "Binance".to_string()
        }
        .is_retryable());
    }
}
