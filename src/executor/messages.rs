//! Request and reply types of the execution RPC surface.
//!
//! Every request field is a plain reference or number; replies carry a
//! [`ResultCode`] and, for queries, the data read from the exchange.

use crate::engine::PositionSnapshot;
use crate::exchange::{Direction, Position};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// RPC result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ResultCode {
    /// Failed or unknown outcome; callers re-query before acting
    Failure = 0,
    Success = 1,
    /// Budget exhausted before the percentage target was reached
    TimedOut = 2,
}

impl ResultCode {
    pub fn is_success(&self) -> bool {
        *self == ResultCode::Success
    }
}

impl From<ResultCode> for u8 {
    fn from(code: ResultCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for ResultCode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ResultCode::Failure),
            1 => Ok(ResultCode::Success),
            2 => Ok(ResultCode::TimedOut),
            other => Err(format!("unknown result code {}", other)),
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

// ==================== Requests ====================

/// Single market order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderParams {
    pub account: String,
    pub instrument: String,
    pub amount: Decimal,
    pub direction: Direction,
}

/// Converge to a signed absolute amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetAmountParams {
    pub account: String,
    pub instrument: String,
    pub target_amount: Decimal,
}

/// Move one side to a fraction of capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetPositionParams {
    pub account: String,
    pub instrument: String,
    pub direction: Direction,
    /// Fraction in [0, 1]
    pub target_percent: Decimal,
}

/// One leg of a paired order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegParams {
    pub account: String,
    pub instrument: String,
    pub direction: Direction,
    pub amount: Decimal,
}

/// Two legs placed concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoOrderParams {
    pub leg_1: LegParams,
    pub leg_2: LegParams,
}

/// Two instruments of one account placed concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBasisParams {
    pub account: String,
    pub instrument_1: String,
    pub instrument_2: String,
    pub direction_1: Direction,
    pub direction_2: Direction,
    pub amount_1: Decimal,
    pub amount_2: Decimal,
}

/// Several instruments of one account converged concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultipleOrderParams {
    pub account: String,
    pub instruments: Vec<String>,
    pub target_amounts: Vec<Decimal>,
}

/// (account, instrument) reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegRef {
    pub account: String,
    pub instrument: String,
}

/// Restore proportionality between two legs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileTwoOrderParams {
    pub leg_a: LegRef,
    pub leg_b: LegRef,
    pub ratio_factor: Decimal,
}

/// Restore proportionality between two instruments of one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileBasisParams {
    pub account: String,
    pub instrument_1: String,
    pub instrument_2: String,
    pub ratio_factor: Decimal,
}

/// Two instruments of one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasisQuery {
    pub account: String,
    pub instrument_1: String,
    pub instrument_2: String,
}

/// Two independent legs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoOrderQuery {
    pub leg_1: LegRef,
    pub leg_2: LegRef,
}

// ==================== Replies ====================

/// Reply of every mutating call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub code: ResultCode,
}

impl OrderResult {
    pub fn new(code: ResultCode) -> Self {
        Self { code }
    }
}

/// Holdings of one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReply {
    pub code: ResultCode,
    pub position: Option<Position>,
}

/// Holdings of two pairs; `basis_bps` is set for same-account basis queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairPositionReply {
    pub code: ResultCode,
    pub leg_1: Option<Position>,
    pub leg_2: Option<Position>,
    pub basis_bps: Option<Decimal>,
}

/// Holdings, balance and capacity of one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityReply {
    pub code: ResultCode,
    pub snapshot: Option<PositionSnapshot>,
}

/// Holdings, balance and capacity of both instruments of a basis pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasisEquityReply {
    pub code: ResultCode,
    pub leg_1: Option<PositionSnapshot>,
    pub leg_2: Option<PositionSnapshot>,
    pub basis_bps: Option<Decimal>,
}

/// Registry sizes after a reload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReloadReply {
    pub code: ResultCode,
    pub accounts: usize,
    pub instruments: usize,
}

/// Reply sent when a call fails before producing any data.
pub trait FailureReply {
    fn failure() -> Self;
}

impl FailureReply for OrderResult {
    fn failure() -> Self {
        OrderResult::new(ResultCode::Failure)
    }
}

impl FailureReply for PositionReply {
    fn failure() -> Self {
        PositionReply {
            code: ResultCode::Failure,
            position: None,
        }
    }
}

impl FailureReply for PairPositionReply {
    fn failure() -> Self {
        PairPositionReply {
            code: ResultCode::Failure,
            leg_1: None,
            leg_2: None,
            basis_bps: None,
        }
    }
}

impl FailureReply for EquityReply {
    fn failure() -> Self {
        EquityReply {
            code: ResultCode::Failure,
            snapshot: None,
        }
    }
}

impl FailureReply for BasisEquityReply {
    fn failure() -> Self {
        BasisEquityReply {
            code: ResultCode::Failure,
            leg_1: None,
            leg_2: None,
            basis_bps: None,
        }
    }
}

impl FailureReply for ReloadReply {
    fn failure() -> Self {
        ReloadReply {
            code: ResultCode::Failure,
            accounts: 0,
            instruments: 0,
        }
    }
}

/// HTTP paths of each procedure.
pub mod routes {
    pub const HEALTH: &str = "/health";
    pub const ORDER: &str = "/rpc/Order";
    pub const TARGET_AMOUNT: &str = "/rpc/TargetAmount";
    pub const TARGET_POSITION: &str = "/rpc/TargetPosition";
    pub const TWO_ORDER: &str = "/rpc/TwoOrder";
    pub const ORDER_BASIS: &str = "/rpc/OrderBasis";
    pub const MULTIPLE_ORDER: &str = "/rpc/MultipleOrder";
    pub const RECONCILE_TWO_ORDER: &str = "/rpc/ReconcileTwoOrder";
    pub const RECONCILE_BASIS: &str = "/rpc/ReconcileBasis";
    pub const CHECK_POSITION: &str = "/rpc/CheckPosition";
    pub const CHECK_BASIS_POSITION: &str = "/rpc/CheckBasisPosition";
    pub const CHECK_TWO_ORDER_POSITION: &str = "/rpc/CheckTwoOrderPosition";
    pub const CHECK_BASIS_POSITION_EQUITY: &str = "/rpc/CheckBasisPositionEquity";
    pub const CHECK_EQUITY: &str = "/rpc/CheckEquity";
    pub const RELOAD_REGISTRY: &str = "/rpc/ReloadRegistry";
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_result_code_is_numeric_on_the_wire() {
        let json = serde_json::to_string(&OrderResult::new(ResultCode::TimedOut)).unwrap();
        assert_eq!(json, r#"{"code":2}"#);

        let parsed: OrderResult = serde_json::from_str(r#"{"code":1}"#).unwrap();
        assert!(parsed.code.is_success());

        assert!(serde_json::from_str::<OrderResult>(r#"{"code":7}"#).is_err());
    }

    #[test]
    fn test_request_decodes_decimal_strings_and_numbers() {
        let params: OrderParams = serde_json::from_str(
            r#"{"account":"main","instrument":"btc-perp","amount":"0.015","direction":"OPEN_LONG"}"#,
        )
        .unwrap();
        assert_eq!(params.amount, dec!(0.015));
        assert_eq!(params.direction, Direction::OpenLong);

        let params: TargetAmountParams = serde_json::from_str(
            r#"{"account":"main","instrument":"btc-perp","target_amount":-3}"#,
        )
        .unwrap();
        assert_eq!(params.target_amount, dec!(-3));
    }
}
