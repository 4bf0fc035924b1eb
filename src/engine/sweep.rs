// 8.3: periodic sweep. credits every elapsed payout boundary across the
// three order books, then releases commissions whose freeze has ended.
// reads do the same work lazily for one user; the sweep catches the rest.

use super::core::Engine;
use super::orders::KindBook;
use super::results::{EngineError, PayoutReport, SweepReport};
use crate::access::{Operator, Permission};
use crate::trade::{BlockPolicy, FundPolicy, IpoPolicy};
use tracing::info;

impl Engine {
    pub fn run_sweep(&mut self, operator: &Operator) -> Result<SweepReport, EngineError> {
        operator.require(Permission::RunSweeps)?;
        let now = self.current_time;

        let mut payouts = PayoutReport::default();
        payouts.merge(self.sweep_book::<BlockPolicy>()?);
        payouts.merge(self.sweep_book::<FundPolicy>()?);
        payouts.merge(self.sweep_book::<IpoPolicy>()?);

        let due = self.commissions.due(now);
        let commissions = self.release_commissions(&due)?;

        info!(
            at = %now,
            payouts = payouts.payouts,
            commissions = commissions.released.len(),
            overdue_debts = self.credit.due_debts(now).len(),
            "sweep complete"
        );
        Ok(SweepReport { payouts, commissions })
    }

    fn sweep_book<P: KindBook>(&mut self) -> Result<PayoutReport, EngineError> {
        let ids = P::book(self).payable();
        let report = self.accrue_kind::<P>(&ids)?;
        let now = self.current_time;
        P::book_mut(self).refresh_locks(now);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use crate::access::{Operator, Role};
    use crate::commission::NewCommission;
    use crate::engine::{Engine, EngineConfig, ErrorKind};
    use crate::ledger::CurrencyAmount;
    use crate::timer::{IntervalUnit, MILLIS_PER_DAY};
    use crate::trade::{FundProduct, FundTier, OrderKind, SubmitRequest};
    use crate::types::{Amount, Currency, InstrumentId, Price, UserId};
    use rust_decimal_macros::dec;

    #[test]
    fn sweep_pays_and_releases() {
        let mut engine = Engine::new(EngineConfig::default());
        let system = Operator::system();
        engine.set_referrer(UserId(2), UserId(1)).unwrap();
        engine
            .ledger_adjust(
                &system,
                UserId(2),
                &[CurrencyAmount::new(Currency::usd(), Amount::new(dec!(1001)))],
                "deposit",
                None,
            )
            .unwrap();

        let tiers = [dec!(100), dec!(250), dec!(500), dec!(1000)]
            .into_iter()
            .map(|p| FundTier {
                price: Price::new(p).unwrap(),
                percent: dec!(0.5),
            })
            .collect();
        let fund_id = engine
            .list_fund(
                &system,
                FundProduct {
                    id: InstrumentId(0),
                    code: "W1".into(),
                    name: "Weekly".into(),
                    currency: Currency::usd(),
                    tiers,
                    dividend: IntervalUnit::Week,
                    redeem_days: 30,
                    active: true,
                },
            )
            .unwrap();
        let req = SubmitRequest::new(fund_id, dec!(1)).with_price(Price::new(dec!(1000)).unwrap());
        let order_id = engine.order_submit(OrderKind::Fund, UserId(2), &req).unwrap();
        let approved = engine.order_approve(&system, OrderKind::Fund, order_id, None).unwrap();
        assert!(approved.commission.is_some());

        engine.advance_time(14 * MILLIS_PER_DAY + 1);
        let report = engine.run_sweep(&Operator::new(5, Role::Operator)).unwrap();
        assert_eq!(report.payouts.payouts, 2);
        assert_eq!(report.commissions.released.len(), 1);
        // two weekly payouts of 5 each; referrer gets 5% of 1000
        assert_eq!(engine.balance(UserId(2), &Currency::usd()).value(), dec!(10));
        assert_eq!(engine.balance(UserId(1), &Currency::usd()).value(), dec!(50));

        let err = engine
            .commission_credit(
                &Operator::new(5, Role::Operator),
                NewCommission {
                    inviter_id: UserId(1),
                    invitee_id: UserId(2),
                    source: "manual".into(),
                    order_id: None,
                    amount: Amount::new(dec!(1)),
                    currency: Currency::usd(),
                    freeze_days: 0,
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }
}
