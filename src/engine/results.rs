// 8.0.2: result types and errors for engine operations.

use crate::access::AccessError;
use crate::commission::CommissionError;
use crate::credit::CreditError;
use crate::ledger::{AdjustOutcome, LedgerError};
use crate::position::PositionError;
use crate::snapshot::SnapshotError;
use crate::trade::{OrderError, OrderKind};
use crate::types::{Amount, CommissionId, Currency, CurrencyError, OrderId, Price, Timestamp};
use crate::withdraw::WithdrawError;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalResult {
    pub kind: OrderKind,
    pub order_id: OrderId,
    pub currency: Currency,
    pub debit: Amount,
    pub fee: Amount,
    pub lock_until: Option<Timestamp>,
    pub next_payout_at: Option<Timestamp>,
    pub commission: Option<CommissionId>,
    pub outcome: AdjustOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedeemResult {
    pub kind: OrderKind,
    pub order_id: OrderId,
    pub currency: Currency,
    pub sell_price: Option<Price>,
    pub credit: Amount,
    pub profit: Amount,
    pub profit_pct: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForceCloseResult {
    pub realized_pnl: Amount,
    pub currency: Currency,
    // a flat close still writes a delta-free witness row
    pub outcome: AdjustOutcome,
}

/// Totals from one payout pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayoutReport {
    pub orders_paid: usize,
    pub payouts: usize,
    pub credited: BTreeMap<Currency, Amount>,
}

impl PayoutReport {
    pub(super) fn record(&mut self, currency: &Currency, amount: Amount) {
        self.payouts += 1;
        let total = self.credited.entry(currency.clone()).or_default();
        *total = total.add(amount);
    }

    pub(super) fn merge(&mut self, other: PayoutReport) {
        self.orders_paid += other.orders_paid;
        self.payouts += other.payouts;
        for (currency, amount) in other.credited {
            let total = self.credited.entry(currency).or_default();
            *total = total.add(amount);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReleaseReport {
    pub released: Vec<CommissionId>,
    pub credited: BTreeMap<Currency, Amount>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub payouts: PayoutReport,
    pub commissions: ReleaseReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Authorization,
    NotFound,
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Authorization => "authorization",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Storage => "storage",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Position error: {0}")]
    Position(#[from] PositionError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Commission error: {0}")]
    Commission(#[from] CommissionError),

    #[error("Withdrawal error: {0}")]
    Withdraw(#[from] WithdrawError),

    #[error("Credit error: {0}")]
    Credit(#[from] CreditError),

    #[error("Access denied: {0}")]
    Access(#[from] AccessError),

    #[error("Currency error: {0}")]
    Currency(#[from] CurrencyError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Insufficient funds: requested {requested} {currency}, available {available}")]
    InsufficientFunds {
        currency: Currency,
        requested: Amount,
        available: Amount,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Ledger(e) => match e {
                LedgerError::ReplayRefused { .. } => ErrorKind::Conflict,
                LedgerError::RequestIdConflict { .. } => ErrorKind::Conflict,
                LedgerError::CorruptAudit(_) => ErrorKind::Storage,
                _ => ErrorKind::Validation,
            },
            EngineError::Position(e) => match e {
                PositionError::NotFound(_) => ErrorKind::NotFound,
                PositionError::Locked(_) | PositionError::DuplicateKey { .. } => ErrorKind::Conflict,
                _ => ErrorKind::Validation,
            },
            EngineError::Order(e) => match e {
                OrderError::OrderNotFound(_) | OrderError::InstrumentNotFound(_) => ErrorKind::NotFound,
                OrderError::InvalidTransition { .. }
                | OrderError::Locked { .. }
                | OrderError::InstrumentInUse(_)
                | OrderError::NotListed(_) => ErrorKind::Conflict,
                OrderError::NotOwner { .. } => ErrorKind::Authorization,
                _ => ErrorKind::Validation,
            },
            EngineError::Commission(e) => match e {
                CommissionError::NotFound(_) => ErrorKind::NotFound,
                CommissionError::AlreadyReleased(_) | CommissionError::StillFrozen { .. } => ErrorKind::Conflict,
                _ => ErrorKind::Validation,
            },
            EngineError::Withdraw(e) => match e {
                WithdrawError::NotFound(_) => ErrorKind::NotFound,
                WithdrawError::InvalidTransition { .. } => ErrorKind::Conflict,
                WithdrawError::NotOwner { .. } => ErrorKind::Authorization,
                _ => ErrorKind::Validation,
            },
            EngineError::Credit(e) => match e {
                CreditError::ApplicationNotFound(_) | CreditError::DebtNotFound(_) => ErrorKind::NotFound,
                CreditError::PendingApplicationExists(_)
                | CreditError::AlreadyReviewed { .. }
                | CreditError::DebtSettled(_) => ErrorKind::Conflict,
                _ => ErrorKind::Validation,
            },
            EngineError::Access(_) => ErrorKind::Authorization,
            EngineError::Currency(_) | EngineError::InvalidRequest(_) => ErrorKind::Validation,
            EngineError::InsufficientFunds { .. } => ErrorKind::Validation,
            EngineError::Snapshot(_) | EngineError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Stable machine-readable code for callers.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Ledger(e) => match e {
                LedgerError::EmptyAdjustment => "EMPTY_ADJUSTMENT",
                LedgerError::ZeroAmount { .. } => "ZERO_AMOUNT",
                LedgerError::Overflow { .. } => "BALANCE_OVERFLOW",
                LedgerError::ReplayRefused { .. } => "REPLAY_REFUSED",
                LedgerError::RequestIdConflict { .. } => "REQUEST_ID_CONFLICT",
                LedgerError::CorruptAudit(_) => "CORRUPT_AUDIT",
            },
            EngineError::Position(e) => match e {
                PositionError::NotFound(_) => "POSITION_NOT_FOUND",
                PositionError::Locked(_) => "POSITION_LOCKED",
                PositionError::InvalidQuantity(_) => "INVALID_QUANTITY",
                PositionError::InvalidSymbol(_) => "INVALID_SYMBOL",
                PositionError::InsufficientQuantity { .. } => "INSUFFICIENT_QUANTITY",
                PositionError::DuplicateKey { .. } => "DUPLICATE_POSITION",
            },
            EngineError::Order(e) => match e {
                OrderError::InstrumentNotFound(_) => "INSTRUMENT_NOT_FOUND",
                OrderError::OrderNotFound(_) => "ORDER_NOT_FOUND",
                OrderError::InvalidInstrument(_) => "INVALID_INSTRUMENT",
                OrderError::InvalidQuantity(_) => "INVALID_QUANTITY",
                OrderError::BelowMinimum { .. } => "BELOW_MINIMUM",
                OrderError::QuantityExceedsRequest { .. } => "QUANTITY_EXCEEDS_REQUEST",
                OrderError::WindowClosed(_) => "WINDOW_CLOSED",
                OrderError::SubscribeKeyMismatch => "SUBSCRIBE_KEY_MISMATCH",
                OrderError::PriceMismatch { .. } => "PRICE_MISMATCH",
                OrderError::MissingPrice => "MISSING_PRICE",
                OrderError::NotListed(_) => "NOT_LISTED",
                OrderError::InvalidTransition { .. } => "INVALID_TRANSITION",
                OrderError::Locked { .. } => "ORDER_LOCKED",
                OrderError::InstrumentInUse(_) => "INSTRUMENT_IN_USE",
                OrderError::NotOwner { .. } => "NOT_OWNER",
            },
            EngineError::Commission(e) => match e {
                CommissionError::NotFound(_) => "COMMISSION_NOT_FOUND",
                CommissionError::NonPositiveAmount(_) => "INVALID_AMOUNT",
                CommissionError::SelfReferral(_) => "SELF_REFERRAL",
                CommissionError::AlreadyReleased(_) => "ALREADY_RELEASED",
                CommissionError::StillFrozen { .. } => "STILL_FROZEN",
            },
            EngineError::Withdraw(e) => match e {
                WithdrawError::NotFound(_) => "WITHDRAWAL_NOT_FOUND",
                WithdrawError::NonPositiveAmount(_) => "INVALID_AMOUNT",
                WithdrawError::MissingDestination => "MISSING_DESTINATION",
                WithdrawError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
                WithdrawError::InvalidTransition { .. } => "INVALID_TRANSITION",
                WithdrawError::NotOwner { .. } => "NOT_OWNER",
            },
            EngineError::Credit(e) => match e {
                CreditError::ApplicationNotFound(_) => "CREDIT_APPLICATION_NOT_FOUND",
                CreditError::DebtNotFound(_) => "DEBT_NOT_FOUND",
                CreditError::NonPositiveAmount(_) => "INVALID_AMOUNT",
                CreditError::InvalidScore(_) => "INVALID_SCORE",
                CreditError::PendingApplicationExists(_) => "PENDING_APPLICATION_EXISTS",
                CreditError::AlreadyReviewed { .. } => "ALREADY_REVIEWED",
                CreditError::DebtSettled(_) => "DEBT_SETTLED",
            },
            EngineError::Access(_) => "FORBIDDEN",
            EngineError::Currency(_) => "INVALID_CURRENCY",
            EngineError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            EngineError::InvalidRequest(_) => "INVALID_REQUEST",
            EngineError::Snapshot(e) => match e {
                SnapshotError::UnsupportedVersion { .. } => "SNAPSHOT_VERSION",
                SnapshotError::Corrupt(_) => "SNAPSHOT_CORRUPT",
                _ => "STORAGE_FAILURE",
            },
            EngineError::Storage(_) => "STORAGE_FAILURE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{Permission, Role};
    use crate::types::PositionId;

    #[test]
    fn kinds_and_codes() {
        let locked = EngineError::from(PositionError::Locked(PositionId(1)));
        assert_eq!(locked.kind(), ErrorKind::Conflict);
        assert_eq!(locked.code(), "POSITION_LOCKED");

        let denied = EngineError::from(AccessError::Forbidden {
            role: Role::Operator,
            permission: Permission::AdjustFunds,
        });
        assert_eq!(denied.kind(), ErrorKind::Authorization);

        let storage = EngineError::Storage("engine lock poisoned".into());
        assert_eq!(storage.kind().to_string(), "storage");
    }
}
