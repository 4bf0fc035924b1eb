// 5.0: instrument orders. block trades, funds and IPO/RWA subscriptions all share one
// state machine (submitted -> approved -> completed/redeemed, or rejected) and one Order row.
// what differs per instrument kind is behind InstrumentPolicy:
//   5.1 policy.rs  - the per-kind hooks (price, window, lock, exit)
//   5.2 book.rs    - generic OrderBook<P>, pure state transitions, no money movement
//   5.3 block.rs   - block trades, subscribe key + absolute lock
//   5.4 fund.rs    - tiered funds with periodic payouts
//   5.5 ipo.rs     - IPO / RWA subscriptions, sell after listing

mod book;
mod policy;

pub mod block;
pub mod fund;
pub mod ipo;

pub use block::{BlockPolicy, BlockTradeItem};
pub use book::OrderBook;
pub use fund::{FundPolicy, FundProduct, FundTier};
pub use ipo::{IpoKind, IpoListing, IpoPolicy};
pub use policy::{Exit, InstrumentPolicy, Pricing};

use crate::timer::{IntervalUnit, LockState};
use crate::types::{Amount, Currency, InstrumentId, OrderId, Price, Timestamp, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Block,
    Fund,
    Ipo,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Block => "block",
            OrderKind::Fund => "fund",
            OrderKind::Ipo => "ipo",
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(OrderKind::Block),
            "fund" => Ok(OrderKind::Fund),
            "ipo" | "rwa" => Ok(OrderKind::Ipo),
            other => Err(format!("Unknown order kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Submitted,
    Approved,
    Rejected,
    Completed,
    Redeemed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Rejected | OrderStatus::Completed | OrderStatus::Redeemed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Submitted => "submitted",
            OrderStatus::Approved => "approved",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Completed => "completed",
            OrderStatus::Redeemed => "redeemed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recurring payout attached to an order: `amount * rate` every `unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutTerms {
    pub unit: IntervalUnit,
    pub rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub instrument_id: InstrumentId,
    pub qty: Decimal,
    pub price: Option<Price>,
    pub subscribe_key: Option<String>,
}

impl SubmitRequest {
    pub fn new(instrument_id: InstrumentId, qty: Decimal) -> Self {
        Self {
            instrument_id,
            qty,
            price: None,
            subscribe_key: None,
        }
    }

    pub fn with_price(mut self, price: Price) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.subscribe_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub kind: OrderKind,
    pub user_id: UserId,
    pub instrument_id: InstrumentId,
    pub currency: Currency,
    pub requested_qty: Decimal,
    pub qty: Decimal,
    pub price: Price,
    pub amount: Amount,
    pub fee: Amount,
    pub status: OrderStatus,
    // held under lock; cleared lazily once lock_until passes, unless manually held
    pub locked: bool,
    pub manual_lock: bool,
    pub lock_until: Option<Timestamp>,
    pub payout: Option<PayoutTerms>,
    // boundary of the most recent payout credited
    #[serde(default)]
    pub last_payout_at: Option<Timestamp>,
    pub next_payout_at: Option<Timestamp>,
    pub payouts_made: u32,
    pub total_paid: Amount,
    pub sell_price: Option<Price>,
    pub sell_amount: Option<Amount>,
    pub profit: Option<Amount>,
    pub profit_pct: Option<Decimal>,
    pub notes: Option<String>,
    pub reviewed_by: Option<u64>,
    pub submitted_at: Timestamp,
    pub approved_at: Option<Timestamp>,
    pub rejected_at: Option<Timestamp>,
    pub closed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl Order {
    pub fn lock_state(&self, now: Timestamp) -> LockState {
        if self.manual_lock {
            return LockState::Locked { remaining_ms: 0 };
        }
        LockState::at(self.lock_until, now)
    }

    pub fn is_redeemable(&self, now: Timestamp) -> bool {
        self.status == OrderStatus::Approved && !self.lock_state(now).is_locked()
    }

    /// Per-interval payout, if the order earns one.
    pub fn payout_amount(&self) -> Option<Amount> {
        self.payout.map(|terms| self.amount.mul(terms.rate))
    }

    pub(crate) fn refresh_lock(&mut self, now: Timestamp) {
        if self.status == OrderStatus::Approved {
            self.locked = self.manual_lock || self.lock_until.map_or(false, |until| until > now);
        }
    }
}

/// Everything an approval will do, computed before any state changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Approval {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub currency: Currency,
    pub qty: Decimal,
    pub price: Price,
    pub amount: Amount,
    pub fee: Amount,
    pub lock_until: Option<Timestamp>,
    pub next_payout_at: Option<Timestamp>,
}

impl Approval {
    // principal plus fee, the ledger debit
    pub fn debit(&self) -> Amount {
        self.amount.add(self.fee)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Redemption {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub currency: Currency,
    pub sell_price: Option<Price>,
    pub credit: Amount,
    pub profit: Amount,
    pub profit_pct: Decimal,
    pub final_status: OrderStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Instrument not found: {0:?}")]
    InstrumentNotFound(InstrumentId),

    #[error("Order not found: {0:?}")]
    OrderNotFound(OrderId),

    #[error("Invalid instrument: {0}")]
    InvalidInstrument(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(Decimal),

    #[error("Quantity {qty} below minimum {min}")]
    BelowMinimum { qty: Decimal, min: Decimal },

    #[error("Approved quantity {qty} exceeds requested {requested}")]
    QuantityExceedsRequest { qty: Decimal, requested: Decimal },

    #[error("Subscription window closed: {0}")]
    WindowClosed(String),

    #[error("Subscribe key mismatch")]
    SubscribeKeyMismatch,

    #[error("Price {requested} does not match {expected}")]
    PriceMismatch { requested: Decimal, expected: String },

    #[error("A sell price is required")]
    MissingPrice,

    #[error("Not listed until {0}")]
    NotListed(Timestamp),

    #[error("Cannot {action} an order in status {from}")]
    InvalidTransition { from: OrderStatus, action: &'static str },

    #[error("Order {order_id:?} is locked ({state})")]
    Locked { order_id: OrderId, state: LockState },

    #[error("Instrument {0:?} still has open orders")]
    InstrumentInUse(InstrumentId),

    #[error("Order {order_id:?} does not belong to user {user_id:?}")]
    NotOwner { order_id: OrderId, user_id: UserId },
}

pub(crate) fn require_whole_qty(qty: Decimal) -> Result<(), OrderError> {
    if qty < Decimal::ONE || !qty.fract().is_zero() {
        return Err(OrderError::InvalidQuantity(qty));
    }
    Ok(())
}

pub(crate) fn check_requested_price(requested: Option<Price>, expected: Price) -> Result<(), OrderError> {
    match requested {
        Some(p) if p != expected => Err(OrderError::PriceMismatch {
            requested: p.value(),
            expected: expected.to_string(),
        }),
        _ => Ok(()),
    }
}
