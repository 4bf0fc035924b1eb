// 11.0: every state change produces an event. the log is the engine's operational trail
// (the fund audit table is the money trail). events are also handed to an optional
// Notifier; delivery is fire-and-forget, a failing notifier never fails the operation.

use crate::credit::CreditStatus;
use crate::ledger::CurrencyAmount;
use crate::trade::{OrderKind, OrderStatus};
use crate::types::{
    Amount, CommissionId, CreditAppId, Currency, DebtId, Market, OrderId, PositionId, Price, RequestId,
    Timestamp, UserId, WithdrawalId,
};
use crate::withdraw::WithdrawStatus;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    // Ledger
    FundsAdjusted(FundsAdjustedEvent),

    // Instrument orders
    OrderSubmitted(OrderSubmittedEvent),
    OrderStatusChanged(OrderStatusEvent),
    OrderPayout(OrderPayoutEvent),
    OrderLockChanged(OrderLockEvent),
    OrderDeleted(OrderDeletedEvent),

    // Positions
    PositionUpdated(PositionUpdatedEvent),
    PositionForceClosed(PositionClosedEvent),
    PositionLockChanged(PositionLockEvent),
    PositionDeleted(PositionDeletedEvent),

    // Referral commissions
    CommissionCredited(CommissionEvent),
    CommissionReleased(CommissionEvent),

    // Withdrawals
    WithdrawalStatusChanged(WithdrawalEvent),

    // Credit
    CreditReviewed(CreditReviewedEvent),
    DebtSettled(DebtSettledEvent),
}

impl EventPayload {
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::FundsAdjusted(_) => "funds_adjusted",
            EventPayload::OrderSubmitted(_) => "order_submitted",
            EventPayload::OrderStatusChanged(_) => "order_status_changed",
            EventPayload::OrderPayout(_) => "order_payout",
            EventPayload::OrderLockChanged(_) => "order_lock_changed",
            EventPayload::OrderDeleted(_) => "order_deleted",
            EventPayload::PositionUpdated(_) => "position_updated",
            EventPayload::PositionForceClosed(_) => "position_force_closed",
            EventPayload::PositionLockChanged(_) => "position_lock_changed",
            EventPayload::PositionDeleted(_) => "position_deleted",
            EventPayload::CommissionCredited(_) => "commission_credited",
            EventPayload::CommissionReleased(_) => "commission_released",
            EventPayload::WithdrawalStatusChanged(_) => "withdrawal_status_changed",
            EventPayload::CreditReviewed(_) => "credit_reviewed",
            EventPayload::DebtSettled(_) => "debt_settled",
        }
    }

    /// The user the event concerns, for routing notifications.
    pub fn user_id(&self) -> UserId {
        match self {
            EventPayload::FundsAdjusted(e) => e.user_id,
            EventPayload::OrderSubmitted(e) => e.user_id,
            EventPayload::OrderStatusChanged(e) => e.user_id,
            EventPayload::OrderPayout(e) => e.user_id,
            EventPayload::OrderLockChanged(e) => e.user_id,
            EventPayload::OrderDeleted(e) => e.user_id,
            EventPayload::PositionUpdated(e) => e.user_id,
            EventPayload::PositionForceClosed(e) => e.user_id,
            EventPayload::PositionLockChanged(e) => e.user_id,
            EventPayload::PositionDeleted(e) => e.user_id,
            EventPayload::CommissionCredited(e) | EventPayload::CommissionReleased(e) => e.inviter_id,
            EventPayload::WithdrawalStatusChanged(e) => e.user_id,
            EventPayload::CreditReviewed(e) => e.user_id,
            EventPayload::DebtSettled(e) => e.user_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundsAdjustedEvent {
    pub user_id: UserId,
    pub operator_id: u64,
    pub request_id: Option<RequestId>,
    pub reason: String,
    pub deltas: Vec<CurrencyAmount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSubmittedEvent {
    pub kind: OrderKind,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub qty: Decimal,
    pub price: Price,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusEvent {
    pub kind: OrderKind,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    // ledger movement caused by the transition, signed from the user's side
    pub amount: Option<Amount>,
    pub currency: Currency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPayoutEvent {
    pub kind: OrderKind,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: Amount,
    pub currency: Currency,
    pub boundary: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLockEvent {
    pub kind: OrderKind,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub operator_id: u64,
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDeletedEvent {
    pub kind: OrderKind,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub operator_id: u64,
    pub status: OrderStatus,
    // principal left behind when an approved order is deleted
    pub forfeited: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdatedEvent {
    pub position_id: PositionId,
    pub user_id: UserId,
    pub symbol: String,
    pub market: Market,
    pub long_qty: Decimal,
    pub short_qty: Decimal,
    pub realized_pnl: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    pub position_id: PositionId,
    pub user_id: UserId,
    pub operator_id: u64,
    pub price: Price,
    pub realized_pnl: Amount,
    pub currency: Currency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionLockEvent {
    pub position_id: PositionId,
    pub user_id: UserId,
    pub operator_id: u64,
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionDeletedEvent {
    pub position_id: PositionId,
    pub user_id: UserId,
    pub operator_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionEvent {
    pub commission_id: CommissionId,
    pub inviter_id: UserId,
    pub invitee_id: UserId,
    pub amount: Amount,
    pub currency: Currency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalEvent {
    pub withdrawal_id: WithdrawalId,
    pub user_id: UserId,
    pub status: WithdrawStatus,
    pub amount: Amount,
    pub currency: Currency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditReviewedEvent {
    pub app_id: CreditAppId,
    pub user_id: UserId,
    pub reviewer_id: u64,
    pub status: CreditStatus,
    pub debt_id: Option<DebtId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebtSettledEvent {
    pub debt_id: DebtId,
    pub user_id: UserId,
    pub amount: Amount,
    pub currency: Currency,
}

// 11.1: notification seam. implementors push to whatever channel they own.
pub trait Notifier: Send + fmt::Debug {
    fn notify(&mut self, event: &Event) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification channel unavailable: {0}")]
    Unavailable(String),

    #[error("Notification rejected: {0}")]
    Rejected(String),
}

// Collects events in memory. handy in tests and for the simulator.
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Vec<Event>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn take(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn for_user(&self, user_id: UserId) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.payload.user_id() == user_id)
            .collect()
    }
}

impl Notifier for EventCollector {
    fn notify(&mut self, event: &Event) -> Result<(), NotifyError> {
        self.events.push(event.clone());
        Ok(())
    }
}
