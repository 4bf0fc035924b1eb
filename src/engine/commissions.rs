//! Referral commissions: credited frozen into escrow, released to the
//! inviter's balance once the freeze ends.

use super::core::Engine;
use super::results::{EngineError, ReleaseReport};
use crate::access::{Operator, Permission};
use crate::commission::{CommissionRecord, CommissionSummary, NewCommission};
use crate::events::{CommissionEvent, EventPayload};
use crate::trade::Order;
use crate::types::{CommissionId, RequestId, UserId};
use tracing::{info, warn};

impl Engine {
    /// Manual credit into escrow. Nothing reaches the balance until release.
    pub fn commission_credit(&mut self, operator: &Operator, entry: NewCommission) -> Result<CommissionId, EngineError> {
        operator.require(Permission::CreditCommission)?;
        let id = self.commissions.credit(entry, self.current_time)?;
        self.emit_commission(id, false);
        Ok(id)
    }

    /// Releases every commission whose freeze has ended.
    pub fn commission_release_due(&mut self, operator: &Operator) -> Result<ReleaseReport, EngineError> {
        operator.require(Permission::RunSweeps)?;
        let due = self.commissions.due(self.current_time);
        self.release_commissions(&due)
    }

    /// An inviter's commissions, releasing any that came due first.
    pub fn commissions_for_inviter(&mut self, inviter_id: UserId) -> Result<Vec<CommissionRecord>, EngineError> {
        let due = self.commissions.due_for(inviter_id, self.current_time);
        self.release_commissions(&due)?;
        Ok(self
            .commissions
            .for_inviter(inviter_id)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn commission_summary(&self, inviter_id: UserId) -> CommissionSummary {
        self.commissions.summary(inviter_id)
    }

    pub fn commission(&self, id: CommissionId) -> Option<&CommissionRecord> {
        self.commissions.get(id)
    }

    /// Referrer's cut of a freshly approved order, if the buyer was referred.
    pub(super) fn credit_referral(&mut self, order: &Order) -> Option<CommissionId> {
        let inviter_id = self.referrals.get(&order.user_id).copied()?;
        let amount = order.amount.mul(self.config.commission_rate);
        if !amount.is_positive() {
            return None;
        }
        let entry = NewCommission {
            inviter_id,
            invitee_id: order.user_id,
            source: order.kind.as_str().to_string(),
            order_id: Some(order.id),
            amount,
            currency: order.currency.clone(),
            freeze_days: self.config.commission_freeze_days,
        };
        // the approval has already committed; a failed credit is logged, not propagated
        match self.commissions.credit(entry, self.current_time) {
            Ok(id) => {
                self.emit_commission(id, false);
                Some(id)
            }
            Err(e) => {
                warn!(order_id = order.id.0, inviter_id = inviter_id.0, error = %e, "referral commission not credited");
                None
            }
        }
    }

    pub(super) fn release_commissions(&mut self, ids: &[CommissionId]) -> Result<ReleaseReport, EngineError> {
        let mut report = ReleaseReport::default();
        let system = Operator::system();

        for &id in ids {
            let Some(record) = self.commissions.get(id) else {
                continue;
            };
            if !record.is_releasable(self.current_time) {
                continue;
            }
            let (inviter_id, currency, amount) = (record.inviter_id, record.currency.clone(), record.amount);

            let request_id = RequestId::new(format!("commission-{}-release", id.0));
            self.post(inviter_id, &currency, amount, "commission release", request_id, &system)?;
            self.commissions.mark_released(id, self.current_time)?;

            report.released.push(id);
            let total = report.credited.entry(currency).or_default();
            *total = total.add(amount);
            self.emit_commission(id, true);
        }

        if !report.released.is_empty() {
            info!(released = report.released.len(), "commissions released");
        }
        Ok(report)
    }

    fn emit_commission(&mut self, id: CommissionId, released: bool) {
        let Some(record) = self.commissions.get(id) else {
            return;
        };
        let event = CommissionEvent {
            commission_id: id,
            inviter_id: record.inviter_id,
            invitee_id: record.invitee_id,
            amount: record.amount,
            currency: record.currency.clone(),
        };
        let payload = if released {
            EventPayload::CommissionReleased(event)
        } else {
            EventPayload::CommissionCredited(event)
        };
        self.emit_event(payload);
    }
}

#[cfg(test)]
mod tests {
    use crate::access::{Operator, Role};
    use crate::commission::{CommissionStatus, NewCommission};
    use crate::engine::{Engine, EngineConfig};
    use crate::timer::MILLIS_PER_DAY;
    use crate::types::{Amount, Currency, UserId};
    use rust_decimal_macros::dec;

    fn entry() -> NewCommission {
        NewCommission {
            inviter_id: UserId(1),
            invitee_id: UserId(2),
            source: "manual".into(),
            order_id: None,
            amount: Amount::new(dec!(25)),
            currency: Currency::usd(),
            freeze_days: 3,
        }
    }

    #[test]
    fn release_waits_for_freeze_and_happens_once() {
        let mut engine = Engine::new(EngineConfig::default());
        let admin = Operator::new(1, Role::Admin);
        let id = engine.commission_credit(&admin, entry()).unwrap();

        let early = engine.commission_release_due(&Operator::system()).unwrap();
        assert!(early.released.is_empty());
        assert_eq!(engine.balance(UserId(1), &Currency::usd()), Amount::zero());

        engine.advance_time(3 * MILLIS_PER_DAY);
        let report = engine.commission_release_due(&Operator::system()).unwrap();
        assert_eq!(report.released, vec![id]);
        let again = engine.commission_release_due(&Operator::system()).unwrap();
        assert!(again.released.is_empty());

        assert_eq!(engine.balance(UserId(1), &Currency::usd()).value(), dec!(25));
        assert_eq!(engine.commission(id).unwrap().status, CommissionStatus::Released);
    }

    #[test]
    fn reading_releases_due_commissions() {
        let mut engine = Engine::new(EngineConfig::default());
        engine.commission_credit(&Operator::system(), entry()).unwrap();
        engine.advance_time(4 * MILLIS_PER_DAY);

        let records = engine.commissions_for_inviter(UserId(1)).unwrap();
        assert_eq!(records[0].status, CommissionStatus::Released);
        let summary = engine.commission_summary(UserId(1));
        assert_eq!(summary.released[&Currency::usd()].value(), dec!(25));
        assert!(summary.frozen.is_empty());
    }

    #[test]
    fn operators_cannot_credit() {
        let mut engine = Engine::new(EngineConfig::default());
        assert!(engine
            .commission_credit(&Operator::new(3, Role::Operator), entry())
            .is_err());
    }

    #[test]
    fn nothing_moves_inside_the_freeze_window() {
        let mut engine = Engine::new(EngineConfig::default());
        let system = Operator::system();
        let id = engine.commission_credit(&system, entry()).unwrap();

        engine.advance_time(2 * MILLIS_PER_DAY);
        assert!(engine.commission_release_due(&system).unwrap().released.is_empty());
        assert_eq!(engine.commission(id).unwrap().status, CommissionStatus::Frozen);
        assert_eq!(engine.balance(UserId(1), &Currency::usd()), Amount::zero());

        engine.advance_time(MILLIS_PER_DAY + 1_000);
        let first = engine.commission_release_due(&system).unwrap();
        let second = engine.commission_release_due(&system).unwrap();
        assert_eq!(first.released, vec![id]);
        assert!(second.released.is_empty());
        assert_eq!(engine.balance(UserId(1), &Currency::usd()).value(), dec!(25));
        assert_eq!(engine.audit_trail(UserId(1)).len(), 1);
    }
}
