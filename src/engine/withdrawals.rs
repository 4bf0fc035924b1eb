//! Withdrawal workflow. An open request holds its amount against the
//! available balance; the ledger is only debited on completion.

use super::core::Engine;
use super::results::EngineError;
use crate::access::{Operator, Permission};
use crate::events::{EventPayload, WithdrawalEvent};
use crate::types::{RequestId, UserId, WithdrawalId};
use crate::withdraw::{WithdrawError, WithdrawOrder, WithdrawRequest};
use tracing::info;

impl Engine {
    pub fn withdraw_create(&mut self, user_id: UserId, req: WithdrawRequest) -> Result<WithdrawalId, EngineError> {
        let balance = self.ledger.balance(user_id, &req.currency);
        let id = self.withdrawals.create(user_id, req, balance, self.current_time)?;
        self.emit_withdrawal(id);
        Ok(id)
    }

    pub fn withdraw_approve(&mut self, operator: &Operator, id: WithdrawalId) -> Result<(), EngineError> {
        operator.require(Permission::ReviewWithdrawals)?;
        self.withdrawals.approve(id, operator.id, self.current_time)?;
        self.emit_withdrawal(id);
        Ok(())
    }

    /// Debits the held amount and closes the request.
    pub fn withdraw_complete(&mut self, operator: &Operator, id: WithdrawalId) -> Result<(), EngineError> {
        operator.require(Permission::ReviewWithdrawals)?;
        let order = self.withdrawals.ensure_completable(id)?;
        let (user_id, currency, amount) = (order.user_id, order.currency.clone(), order.amount);
        let request_id = RequestId::new(format!("withdraw-{}-complete", id.0));

        if !self.ledger.is_witnessed(&request_id) {
            // the request's own hold is inside `held`, so the balance must cover every open hold
            let balance = self.ledger.balance(user_id, &currency);
            let held = self.withdrawals.held(user_id, &currency);
            if balance < held {
                return Err(WithdrawError::InsufficientFunds {
                    requested: amount,
                    available: balance.sub(held.sub(amount)),
                }
                .into());
            }
        }
        self.post(user_id, &currency, amount.negate(), "withdrawal", request_id, operator)?;
        self.withdrawals.complete(id, operator.id, self.current_time)?;

        info!(withdrawal_id = id.0, user_id = user_id.0, %amount, %currency, "withdrawal completed");
        self.emit_withdrawal(id);
        Ok(())
    }

    pub fn withdraw_reject(&mut self, operator: &Operator, id: WithdrawalId, notes: Option<&str>) -> Result<(), EngineError> {
        operator.require(Permission::ReviewWithdrawals)?;
        let notes = notes.map(str::trim).filter(|n| !n.is_empty()).map(String::from);
        self.withdrawals.reject(id, operator.id, notes, self.current_time)?;
        self.emit_withdrawal(id);
        Ok(())
    }

    pub fn withdraw_cancel(&mut self, user_id: UserId, id: WithdrawalId) -> Result<(), EngineError> {
        self.withdrawals.cancel(id, user_id, self.current_time)?;
        self.emit_withdrawal(id);
        Ok(())
    }

    pub fn withdrawal(&self, id: WithdrawalId) -> Option<&WithdrawOrder> {
        self.withdrawals.get(id)
    }

    pub fn withdrawals_for(&self, user_id: UserId) -> Vec<&WithdrawOrder> {
        self.withdrawals.for_user(user_id)
    }

    fn emit_withdrawal(&mut self, id: WithdrawalId) {
        if let Some(order) = self.withdrawals.get(id) {
            let payload = EventPayload::WithdrawalStatusChanged(WithdrawalEvent {
                withdrawal_id: id,
                user_id: order.user_id,
                status: order.status,
                amount: order.amount,
                currency: order.currency.clone(),
            });
            self.emit_event(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::access::{Operator, Role};
    use crate::engine::{Engine, EngineConfig, ErrorKind};
    use crate::ledger::CurrencyAmount;
    use crate::types::{Amount, Currency, UserId};
    use crate::withdraw::{WithdrawMethod, WithdrawRequest, WithdrawStatus};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn engine_with(balance: Decimal) -> Engine {
        let mut engine = Engine::new(EngineConfig::default());
        engine
            .ledger_adjust(
                &Operator::system(),
                UserId(7),
                &[CurrencyAmount::new(Currency::usdt(), Amount::new(balance))],
                "deposit",
                None,
            )
            .unwrap();
        engine
    }

    fn request(amount: Decimal) -> WithdrawRequest {
        WithdrawRequest {
            currency: Currency::usdt(),
            amount: Amount::new(amount),
            method: WithdrawMethod::CryptoWallet,
            destination: "TXkq9w1".into(),
        }
    }

    #[test]
    fn hold_then_debit_on_completion() {
        let mut engine = engine_with(dec!(100));
        let op = Operator::new(4, Role::Operator);
        let id = engine.withdraw_create(UserId(7), request(dec!(60))).unwrap();
        assert_eq!(engine.available_balance(UserId(7), &Currency::usdt()).value(), dec!(40));
        assert!(engine.withdraw_create(UserId(7), request(dec!(50))).is_err());

        engine.withdraw_approve(&op, id).unwrap();
        engine.withdraw_complete(&op, id).unwrap();
        assert_eq!(engine.balance(UserId(7), &Currency::usdt()).value(), dec!(40));
        assert_eq!(engine.available_balance(UserId(7), &Currency::usdt()).value(), dec!(40));
        assert_eq!(engine.withdrawal(id).unwrap().status, WithdrawStatus::Completed);

        let err = engine.withdraw_complete(&op, id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(engine.balance(UserId(7), &Currency::usdt()).value(), dec!(40));
    }

    #[test]
    fn cancel_releases_the_hold() {
        let mut engine = engine_with(dec!(100));
        let id = engine.withdraw_create(UserId(7), request(dec!(100))).unwrap();
        assert!(engine.withdraw_cancel(UserId(8), id).is_err());
        engine.withdraw_cancel(UserId(7), id).unwrap();
        assert_eq!(engine.available_balance(UserId(7), &Currency::usdt()).value(), dec!(100));
    }

    #[test]
    fn completion_refused_when_balance_drained() {
        let mut engine = engine_with(dec!(100));
        let op = Operator::new(1, Role::Admin);
        let id = engine.withdraw_create(UserId(7), request(dec!(80))).unwrap();
        engine.withdraw_approve(&op, id).unwrap();
        engine
            .ledger_adjust(
                &op,
                UserId(7),
                &[CurrencyAmount::new(Currency::usdt(), Amount::new(dec!(-50)))],
                "chargeback",
                None,
            )
            .unwrap();

        let err = engine.withdraw_complete(&op, id).unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
        engine.withdraw_reject(&op, id, Some("funds reversed")).unwrap();
        assert_eq!(engine.withdrawal(id).unwrap().status, WithdrawStatus::Rejected);
    }

    #[test]
    fn caller_token_cannot_pre_claim_the_completion_debit() {
        let mut engine = engine_with(dec!(100));
        engine
            .ledger_adjust(
                &Operator::new(1, Role::Admin),
                UserId(7),
                &[CurrencyAmount::new(Currency::usdt(), Amount::new(dec!(1)))],
                "bonus",
                Some("withdraw-1-complete"),
            )
            .unwrap();

        let op = Operator::new(4, Role::Operator);
        let id = engine.withdraw_create(UserId(7), request(dec!(100))).unwrap();
        engine.withdraw_approve(&op, id).unwrap();
        engine.withdraw_complete(&op, id).unwrap();

        assert_eq!(engine.withdrawal(id).unwrap().status, WithdrawStatus::Completed);
        assert_eq!(engine.balance(UserId(7), &Currency::usdt()).value(), dec!(1));
    }
}
