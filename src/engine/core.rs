// 8.0 engine/core.rs: main engine. owns the ledger and every book, the clock and the event log.

use super::config::EngineConfig;
use super::results::EngineError;
use crate::access::Operator;
use crate::commission::CommissionEscrow;
use crate::credit::CreditDesk;
use crate::events::{Event, EventId, EventPayload, Notifier};
use crate::ledger::{AdjustOutcome, BalanceLedger, CurrencyAmount};
use crate::position::PositionBook;
use crate::trade::{BlockPolicy, FundPolicy, IpoPolicy, OrderBook};
use crate::types::{Amount, Currency, RequestId, Timestamp, UserId};
use crate::withdraw::WithdrawalBook;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/** 8.1: main engine struct. all state lives here */
#[derive(Debug)]
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) ledger: BalanceLedger,
    pub(super) positions: PositionBook,
    pub(super) block_trades: OrderBook<BlockPolicy>,
    pub(super) funds: OrderBook<FundPolicy>,
    pub(super) ipos: OrderBook<IpoPolicy>,
    pub(super) commissions: CommissionEscrow,
    pub(super) withdrawals: WithdrawalBook,
    pub(super) credit: CreditDesk,
    // invitee -> inviter
    pub(super) referrals: BTreeMap<UserId, UserId>,
    pub(super) notifier: Option<Box<dyn Notifier>>,
    pub(super) events: Vec<Event>,
    pub(super) next_event_id: u64,
    pub(super) current_time: Timestamp,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ledger: BalanceLedger::new(),
            positions: PositionBook::new(),
            block_trades: OrderBook::new(),
            funds: OrderBook::new(),
            ipos: OrderBook::new(),
            commissions: CommissionEscrow::new(),
            withdrawals: WithdrawalBook::new(),
            credit: CreditDesk::new(),
            referrals: BTreeMap::new(),
            notifier: None,
            events: Vec::new(),
            next_event_id: 1,
            current_time: Timestamp::from_millis(0),
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn set_notifier(&mut self, notifier: Box<dyn Notifier>) {
        self.notifier = Some(notifier);
    }

    pub fn take_notifier(&mut self) -> Option<Box<dyn Notifier>> {
        self.notifier.take()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // --- clock ---

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.current_time = self.current_time.plus_millis(millis);
    }

    /// Moves the clock to wall time, never backwards.
    pub fn sync_clock(&mut self) {
        let now = Timestamp::now();
        if now > self.current_time {
            self.current_time = now;
        }
    }

    // --- referrals ---

    pub fn set_referrer(&mut self, user_id: UserId, inviter_id: UserId) -> Result<(), EngineError> {
        if user_id == inviter_id {
            return Err(EngineError::InvalidRequest(format!(
                "user {} cannot refer themselves",
                user_id.0
            )));
        }
        // walk the chain so a referral never loops back
        let mut cursor = Some(inviter_id);
        while let Some(current) = cursor {
            if current == user_id {
                return Err(EngineError::InvalidRequest(format!(
                    "referral from {} to {} would form a cycle",
                    inviter_id.0, user_id.0
                )));
            }
            cursor = self.referrals.get(&current).copied();
        }
        self.referrals.insert(user_id, inviter_id);
        Ok(())
    }

    pub fn referrer_of(&self, user_id: UserId) -> Option<UserId> {
        self.referrals.get(&user_id).copied()
    }

    // --- balances ---

    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    /// Balance minus open withdrawal holds.
    pub fn available_balance(&self, user_id: UserId, currency: &Currency) -> Amount {
        self.ledger
            .balance(user_id, currency)
            .sub(self.withdrawals.held(user_id, currency))
    }

    pub(super) fn ensure_available(
        &self,
        user_id: UserId,
        currency: &Currency,
        requested: Amount,
    ) -> Result<(), EngineError> {
        let available = self.available_balance(user_id, currency);
        if requested > available {
            return Err(EngineError::InsufficientFunds {
                currency: currency.clone(),
                requested,
                available,
            });
        }
        Ok(())
    }

    /// Single-currency ledger write on behalf of an engine flow.
    pub(super) fn post(
        &mut self,
        user_id: UserId,
        currency: &Currency,
        amount: Amount,
        reason: &str,
        request_id: RequestId,
        operator: &Operator,
    ) -> Result<AdjustOutcome, EngineError> {
        let ops = [CurrencyAmount::new(currency.clone(), amount)];
        let outcome = self.ledger.adjust(
            user_id,
            &ops,
            reason,
            Some(&request_id),
            operator,
            self.current_time,
        )?;
        match outcome {
            AdjustOutcome::Applied(audit_id) => debug!(
                user_id = user_id.0,
                %currency,
                %amount,
                request_id = %request_id,
                audit_id = audit_id.0,
                "ledger posted"
            ),
            AdjustOutcome::Replayed(audit_id) => info!(
                user_id = user_id.0,
                request_id = %request_id,
                audit_id = audit_id.0,
                "ledger write already applied, skipping"
            ),
        }
        Ok(outcome)
    }

    // --- events ---

    pub fn recent_events(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub(super) fn emit_event(&mut self, payload: EventPayload) {
        let event = Event::new(EventId(self.next_event_id), self.current_time, payload);
        self.next_event_id += 1;

        if self.config.verbose {
            info!(event_id = event.id.0, event = event.payload.name(), payload = ?event.payload, "event");
        } else {
            debug!(event_id = event.id.0, event = event.payload.name(), "event");
        }

        if let Some(notifier) = self.notifier.as_mut() {
            if let Err(e) = notifier.notify(&event) {
                warn!(event_id = event.id.0, error = %e, "notification dropped");
            }
        }

        self.events.push(event);

        if self.events.len() > self.config.max_events {
            let drain_count = self.events.len() - self.config.max_events;
            self.events.drain(0..drain_count);
        }
    }
}
