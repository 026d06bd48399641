//! Error type shared by the execution engine and the RPC front.
//!
//! Engine functions return `Result<T, ExecutionError>`; the RPC front is the only
//! place where an error is collapsed into a wire result code.

use rust_decimal::Decimal;
use thiserror::Error;

/// Failures raised while turning a request into exchange orders.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Account reference missing from the registry snapshot.
    #[error("unknown account: {0}")]
    UnknownAccount(String),

    /// Instrument reference missing from the registry snapshot.
    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    /// Request could not be interpreted (mismatched lists, bad percentages, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No usable top-of-book quote for the instrument.
    #[error("no quote available for {0}")]
    MissingQuote(String),

    /// Exchange accepted the call but refused the order.
    #[error("order rejected: {direction} {amount} ({reason})")]
    OrderRejected {
        direction: String,
        amount: Decimal,
        reason: String,
    },

    /// Transport or API failure reported by an exchange adapter.
    #[error("exchange error: {0:#}")]
    Exchange(#[from] anyhow::Error),

    /// Store failure while loading the registry.
    #[error("store error: {0}")]
    Store(String),
}

impl ExecutionError {
    /// Short machine-friendly tag for structured logs and the audit table.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::UnknownAccount(_) => "unknown_account",
            ExecutionError::UnknownInstrument(_) => "unknown_instrument",
            ExecutionError::InvalidRequest(_) => "invalid_request",
            ExecutionError::MissingQuote(_) => "missing_quote",
            ExecutionError::OrderRejected { .. } => "order_rejected",
            ExecutionError::Exchange(_) => "exchange",
            ExecutionError::Store(_) => "store",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use rust_decimal_macros::dec;

    #[test]
    fn test_exchange_error_keeps_context_chain() {
        let inner: anyhow::Result<()> = Err(anyhow::anyhow!("connection reset"));
        let err: ExecutionError = inner.context("Failed to fetch positions").unwrap_err().into();

        let text = err.to_string();
        assert!(text.contains("Failed to fetch positions"));
        assert!(text.contains("connection reset"));
        assert_eq!(err.kind(), "exchange");
    }

    #[test]
    fn test_rejected_message() {
        let err = ExecutionError::OrderRejected {
            direction: "OPEN_LONG".to_string(),
            amount: dec!(3),
            reason: "status REJECTED".to_string(),
        };
        assert_eq!(err.to_string(), "order rejected: OPEN_LONG 3 (status REJECTED)");
    }
}
