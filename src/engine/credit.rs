//! Credit lines: apply, review, settle.

use super::core::Engine;
use super::results::EngineError;
use crate::access::{AccessError, Operator, Permission};
use crate::credit::{CreditApplication, CreditDebt, CreditRequest, CreditStatus};
use crate::events::{CreditReviewedEvent, DebtSettledEvent, EventPayload};
use crate::types::{CreditAppId, DebtId, RequestId, UserId};
use tracing::info;

impl Engine {
    pub fn credit_apply(&mut self, user_id: UserId, req: CreditRequest) -> Result<CreditAppId, EngineError> {
        let id = self.credit.apply(user_id, req, self.current_time)?;
        info!(app_id = id.0, user_id = user_id.0, "credit application filed");
        Ok(id)
    }

    /// Credits the requested amount and opens a debt due after the period.
    pub fn credit_approve(&mut self, operator: &Operator, id: CreditAppId) -> Result<DebtId, EngineError> {
        operator.require(Permission::ReviewCredit)?;
        let app = self.credit.pending(id)?;
        let (user_id, currency, amount) = (app.user_id, app.currency.clone(), app.amount);

        let request_id = RequestId::new(format!("credit-{}-approve", id.0));
        self.post(user_id, &currency, amount, "credit line", request_id, operator)?;
        let debt = self.credit.approve(id, operator.id, self.current_time)?;
        let (debt_id, due_at) = (debt.id, debt.due_at);

        info!(app_id = id.0, debt_id = debt_id.0, user_id = user_id.0, %amount, %due_at, "credit approved");
        self.emit_event(EventPayload::CreditReviewed(CreditReviewedEvent {
            app_id: id,
            user_id,
            reviewer_id: operator.id,
            status: CreditStatus::Approved,
            debt_id: Some(debt_id),
        }));
        Ok(debt_id)
    }

    pub fn credit_reject(&mut self, operator: &Operator, id: CreditAppId, notes: Option<&str>) -> Result<(), EngineError> {
        operator.require(Permission::ReviewCredit)?;
        let notes = notes.map(str::trim).filter(|n| !n.is_empty()).map(String::from);
        let user_id = self.credit.reject(id, operator.id, notes, self.current_time)?.user_id;
        self.emit_event(EventPayload::CreditReviewed(CreditReviewedEvent {
            app_id: id,
            user_id,
            reviewer_id: operator.id,
            status: CreditStatus::Rejected,
            debt_id: None,
        }));
        Ok(())
    }

    /// User repayment in full from the available balance.
    pub fn credit_settle(&mut self, user_id: UserId, id: DebtId) -> Result<(), EngineError> {
        let debt = self.credit.active_debt(id)?;
        if debt.user_id != user_id {
            return Err(AccessError::NotOwner {
                user: user_id.0,
                resource: format!("debt {}", id.0),
            }
            .into());
        }
        let (currency, amount) = (debt.currency.clone(), debt.amount);
        let request_id = RequestId::new(format!("credit-debt-{}-settle", id.0));

        if !self.ledger.is_witnessed(&request_id) {
            self.ensure_available(user_id, &currency, amount)?;
        }
        self.post(user_id, &currency, amount.negate(), "credit repayment", request_id, &Operator::system())?;
        self.credit.mark_settled(id, self.current_time)?;

        self.emit_event(EventPayload::DebtSettled(DebtSettledEvent {
            debt_id: id,
            user_id,
            amount,
            currency,
        }));
        Ok(())
    }

    pub fn credit_applications_for(&self, user_id: UserId) -> Vec<&CreditApplication> {
        self.credit.applications_for(user_id)
    }

    pub fn credit_debt(&self, id: DebtId) -> Option<&CreditDebt> {
        self.credit.debt(id)
    }

    /// Active debts past their due time.
    pub fn credit_overdue(&self) -> Vec<&CreditDebt> {
        self.credit.due_debts(self.current_time)
    }
}

#[cfg(test)]
mod tests {
    use crate::access::{Operator, Role};
    use crate::credit::{CreditPeriodUnit, CreditRequest, DebtStatus};
    use crate::engine::{Engine, EngineConfig, ErrorKind};
    use crate::timer::MILLIS_PER_DAY;
    use crate::types::{Amount, Currency, UserId};
    use rust_decimal_macros::dec;

    fn request() -> CreditRequest {
        CreditRequest {
            amount: Amount::new(dec!(500)),
            currency: Currency::mxn(),
            score: 720,
            period_value: 1,
            period_unit: CreditPeriodUnit::Month,
        }
    }

    #[test]
    fn approve_credits_and_settle_debits() {
        let mut engine = Engine::new(EngineConfig::default());
        let reviewer = Operator::new(9, Role::SuperAdmin);
        let app = engine.credit_apply(UserId(3), request()).unwrap();

        let debt_id = engine.credit_approve(&reviewer, app).unwrap();
        assert_eq!(engine.balance(UserId(3), &Currency::mxn()).value(), dec!(500));
        let debt = engine.credit_debt(debt_id).unwrap();
        assert_eq!(debt.due_at.as_millis(), 30 * MILLIS_PER_DAY);

        assert_eq!(
            engine.credit_approve(&reviewer, app).unwrap_err().kind(),
            ErrorKind::Conflict
        );

        engine.advance_time(31 * MILLIS_PER_DAY);
        assert_eq!(engine.credit_overdue().len(), 1);
        engine.credit_settle(UserId(3), debt_id).unwrap();
        assert_eq!(engine.balance(UserId(3), &Currency::mxn()), Amount::zero());
        assert_eq!(engine.credit_debt(debt_id).unwrap().status, DebtStatus::Settled);
        assert!(engine.credit_overdue().is_empty());
    }

    #[test]
    fn admins_cannot_review_credit() {
        let mut engine = Engine::new(EngineConfig::default());
        let app = engine.credit_apply(UserId(3), request()).unwrap();
        let err = engine
            .credit_approve(&Operator::new(2, Role::Admin), app)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        engine
            .credit_reject(&Operator::new(9, Role::SuperAdmin), app, Some("score too low"))
            .unwrap();
        // a rejected application frees the user to apply again
        engine.credit_apply(UserId(3), request()).unwrap();
    }
}
