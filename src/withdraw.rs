// 9.2 withdraw.rs: withdrawal requests. pending -> processing -> completed, with reject
// from either open state and user cancel while pending. open requests hold funds without
// debiting them; the ledger debit happens once, at completion.

use crate::types::{Amount, Currency, Timestamp, UserId, WithdrawalId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawStatus {
    Pending,
    Processing,
    Completed,
    Rejected,
    Canceled,
}

impl WithdrawStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, WithdrawStatus::Pending | WithdrawStatus::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawStatus::Pending => "pending",
            WithdrawStatus::Processing => "processing",
            WithdrawStatus::Completed => "completed",
            WithdrawStatus::Rejected => "rejected",
            WithdrawStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for WithdrawStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawMethod {
    BankCard,
    CryptoWallet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawOrder {
    pub id: WithdrawalId,
    pub user_id: UserId,
    pub currency: Currency,
    pub amount: Amount,
    pub method: WithdrawMethod,
    // card number or wallet address
    pub destination: String,
    pub status: WithdrawStatus,
    pub operator_id: Option<u64>,
    pub notes: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub approved_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub rejected_at: Option<Timestamp>,
    pub canceled_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawRequest {
    pub currency: Currency,
    pub amount: Amount,
    pub method: WithdrawMethod,
    pub destination: String,
}

#[derive(Debug, Clone, Default)]
pub struct WithdrawalBook {
    orders: BTreeMap<WithdrawalId, WithdrawOrder>,
    next_id: u64,
}

impl WithdrawalBook {
    pub fn new() -> Self {
        Self {
            orders: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Sum of open requests for one user and currency.
    pub fn held(&self, user_id: UserId, currency: &Currency) -> Amount {
        self.orders
            .values()
            .filter(|o| o.user_id == user_id && &o.currency == currency && o.status.is_open())
            .map(|o| o.amount)
            .sum()
    }

    /// `balance` is the user's ledger balance in the request currency.
    pub fn create(
        &mut self,
        user_id: UserId,
        req: WithdrawRequest,
        balance: Amount,
        now: Timestamp,
    ) -> Result<WithdrawalId, WithdrawError> {
        if !req.amount.is_positive() {
            return Err(WithdrawError::NonPositiveAmount(req.amount));
        }
        let destination = req.destination.trim();
        if destination.is_empty() {
            return Err(WithdrawError::MissingDestination);
        }
        let available = balance.sub(self.held(user_id, &req.currency));
        if req.amount > available {
            return Err(WithdrawError::InsufficientFunds {
                requested: req.amount,
                available,
            });
        }

        let id = WithdrawalId(self.next_id);
        self.next_id += 1;
        self.orders.insert(
            id,
            WithdrawOrder {
                id,
                user_id,
                currency: req.currency,
                amount: req.amount,
                method: req.method,
                destination: destination.to_string(),
                status: WithdrawStatus::Pending,
                operator_id: None,
                notes: None,
                created_at: now,
                updated_at: now,
                approved_at: None,
                completed_at: None,
                rejected_at: None,
                canceled_at: None,
            },
        );
        Ok(id)
    }

    pub fn approve(&mut self, id: WithdrawalId, operator_id: u64, now: Timestamp) -> Result<&WithdrawOrder, WithdrawError> {
        let order = self.transition(id, &[WithdrawStatus::Pending], "approve")?;
        order.status = WithdrawStatus::Processing;
        order.operator_id = Some(operator_id);
        order.approved_at = Some(now);
        order.updated_at = now;
        Ok(order)
    }

    /// Checks a completion is allowed without changing anything.
    pub fn ensure_completable(&self, id: WithdrawalId) -> Result<&WithdrawOrder, WithdrawError> {
        let order = self.orders.get(&id).ok_or(WithdrawError::NotFound(id))?;
        if order.status != WithdrawStatus::Processing {
            return Err(WithdrawError::InvalidTransition {
                from: order.status,
                action: "complete",
            });
        }
        Ok(order)
    }

    pub fn complete(&mut self, id: WithdrawalId, operator_id: u64, now: Timestamp) -> Result<&WithdrawOrder, WithdrawError> {
        let order = self.transition(id, &[WithdrawStatus::Processing], "complete")?;
        order.status = WithdrawStatus::Completed;
        order.operator_id = Some(operator_id);
        order.completed_at = Some(now);
        order.updated_at = now;
        Ok(order)
    }

    pub fn reject(
        &mut self,
        id: WithdrawalId,
        operator_id: u64,
        notes: Option<String>,
        now: Timestamp,
    ) -> Result<&WithdrawOrder, WithdrawError> {
        let order = self.transition(
            id,
            &[WithdrawStatus::Pending, WithdrawStatus::Processing],
            "reject",
        )?;
        order.status = WithdrawStatus::Rejected;
        order.operator_id = Some(operator_id);
        order.notes = notes;
        order.rejected_at = Some(now);
        order.updated_at = now;
        Ok(order)
    }

    pub fn cancel(&mut self, id: WithdrawalId, user_id: UserId, now: Timestamp) -> Result<&WithdrawOrder, WithdrawError> {
        match self.orders.get(&id) {
            None => return Err(WithdrawError::NotFound(id)),
            Some(o) if o.user_id != user_id => {
                return Err(WithdrawError::NotOwner { id, user_id });
            }
            Some(_) => {}
        }
        let order = self.transition(id, &[WithdrawStatus::Pending], "cancel")?;
        order.status = WithdrawStatus::Canceled;
        order.canceled_at = Some(now);
        order.updated_at = now;
        Ok(order)
    }

    pub fn get(&self, id: WithdrawalId) -> Option<&WithdrawOrder> {
        self.orders.get(&id)
    }

    pub fn for_user(&self, user_id: UserId) -> Vec<&WithdrawOrder> {
        self.orders.values().filter(|o| o.user_id == user_id).collect()
    }

    /// Next id to be issued. Persisted so a restore never reissues an id
    /// whose row was deleted.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn resume_from(&mut self, next_id: u64) {
        self.next_id = self.next_id.max(next_id);
    }

    pub fn rows(&self) -> Vec<WithdrawOrder> {
        self.orders.values().cloned().collect()
    }

    pub fn from_rows(rows: Vec<WithdrawOrder>) -> Self {
        let mut book = Self::new();
        for row in rows {
            book.next_id = book.next_id.max(row.id.0 + 1);
            book.orders.insert(row.id, row);
        }
        book
    }

    fn transition(
        &mut self,
        id: WithdrawalId,
        allowed: &[WithdrawStatus],
        action: &'static str,
    ) -> Result<&mut WithdrawOrder, WithdrawError> {
        let order = self.orders.get_mut(&id).ok_or(WithdrawError::NotFound(id))?;
        if !allowed.contains(&order.status) {
            return Err(WithdrawError::InvalidTransition {
                from: order.status,
                action,
            });
        }
        Ok(order)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WithdrawError {
    #[error("Withdrawal not found: {0:?}")]
    NotFound(WithdrawalId),

    #[error("Withdrawal amount must be positive, got {0}")]
    NonPositiveAmount(Amount),

    #[error("Withdrawal destination is required")]
    MissingDestination,

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Amount, available: Amount },

    #[error("Cannot {action} a withdrawal in status {from}")]
    InvalidTransition { from: WithdrawStatus, action: &'static str },

    #[error("Withdrawal {id:?} does not belong to user {user_id:?}")]
    NotOwner { id: WithdrawalId, user_id: UserId },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(amount: rust_decimal::Decimal) -> WithdrawRequest {
        WithdrawRequest {
            currency: Currency::usdt(),
            amount: Amount::new(amount),
            method: WithdrawMethod::CryptoWallet,
            destination: "TXYZ".into(),
        }
    }

    #[test]
    fn holds_reduce_what_can_be_requested() {
        let mut book = WithdrawalBook::new();
        let balance = Amount::new(dec!(100));
        let now = Timestamp::default();

        book.create(UserId(1), request(dec!(60)), balance, now).unwrap();
        assert_eq!(book.held(UserId(1), &Currency::usdt()).value(), dec!(60));

        let err = book.create(UserId(1), request(dec!(50)), balance, now).unwrap_err();
        assert_eq!(
            err,
            WithdrawError::InsufficientFunds {
                requested: Amount::new(dec!(50)),
                available: Amount::new(dec!(40)),
            }
        );
        book.create(UserId(1), request(dec!(40)), balance, now).unwrap();
    }

    #[test]
    fn state_machine_paths() {
        let mut book = WithdrawalBook::new();
        let now = Timestamp::default();
        let id = book.create(UserId(1), request(dec!(10)), Amount::new(dec!(10)), now).unwrap();

        assert!(book.complete(id, 1, now).is_err());
        book.approve(id, 1, now).unwrap();
        assert!(matches!(
            book.cancel(id, UserId(1), now),
            Err(WithdrawError::InvalidTransition { .. })
        ));
        book.complete(id, 1, now).unwrap();
        assert_eq!(book.get(id).unwrap().status, WithdrawStatus::Completed);
        assert!(book.held(UserId(1), &Currency::usdt()).is_zero());
        assert!(book.reject(id, 1, None, now).is_err());
    }

    #[test]
    fn cancel_is_owner_only_and_releases_hold() {
        let mut book = WithdrawalBook::new();
        let now = Timestamp::default();
        let id = book.create(UserId(1), request(dec!(10)), Amount::new(dec!(10)), now).unwrap();

        assert!(matches!(
            book.cancel(id, UserId(2), now),
            Err(WithdrawError::NotOwner { .. })
        ));
        book.cancel(id, UserId(1), now).unwrap();
        assert!(book.held(UserId(1), &Currency::usdt()).is_zero());
    }

    #[test]
    fn blank_destination_is_refused() {
        let mut book = WithdrawalBook::new();
        let mut req = request(dec!(1));
        req.destination = "  ".into();
        assert_eq!(
            book.create(UserId(1), req, Amount::new(dec!(5)), Timestamp::default()),
            Err(WithdrawError::MissingDestination)
        );
    }
}
