//! Balance ledger.
//!
//! Per-user, per-currency balances plus the fund audit log. Every balance
//! mutation in the crate goes through [`BalanceLedger::adjust`], which
//! writes exactly one [`FundAuditRecord`] per applied call. A call carrying
//! a request id that has already been witnessed applies nothing and hands
//! back the earlier record's id.

use crate::access::{Operator, Role};
use crate::idempotency::{GuardError, Guarded, IdempotencyGuard};
use crate::types::{Amount, AuditId, Currency, RequestId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyAmount {
    pub currency: Currency,
    pub amount: Amount,
}

impl CurrencyAmount {
    pub fn new(currency: Currency, amount: Amount) -> Self {
        Self { currency, amount }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundAuditRecord {
    pub id: AuditId,
    pub user_id: UserId,
    pub operator_id: u64,
    pub operator_role: Role,
    pub request_id: Option<RequestId>,
    pub reason: String,
    pub deltas: Vec<CurrencyAmount>,
    // balance of each touched currency after the call
    pub balances_after: Vec<CurrencyAmount>,
    pub created_at: Timestamp,
}

impl FundAuditRecord {
    /// Net delta this row applied to one currency.
    pub fn delta(&self, currency: &Currency) -> Amount {
        self.deltas
            .iter()
            .filter(|d| &d.currency == currency)
            .map(|d| &d.amount)
            .sum()
    }
}

/// Flat row used by snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRow {
    pub user_id: UserId,
    pub currency: Currency,
    pub amount: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustOutcome {
    Applied(AuditId),
    Replayed(AuditId),
}

impl AdjustOutcome {
    pub fn audit_id(&self) -> AuditId {
        match self {
            AdjustOutcome::Applied(id) | AdjustOutcome::Replayed(id) => *id,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, AdjustOutcome::Applied(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct BalanceLedger {
    balances: BTreeMap<UserId, BTreeMap<Currency, Amount>>,
    audit: Vec<FundAuditRecord>,
    guard: IdempotencyGuard,
    next_audit_id: u64,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self {
            next_audit_id: 1,
            ..Default::default()
        }
    }

    /// Apply signed deltas to one user's balances, atomically.
    ///
    /// All deltas are validated and the resulting balances computed before
    /// anything is written, so a failing call leaves no trace. Negative
    /// results are allowed here; callers that must not overdraw check
    /// available funds first.
    pub fn adjust(
        &mut self,
        user_id: UserId,
        ops: &[CurrencyAmount],
        reason: &str,
        request_id: Option<&RequestId>,
        operator: &Operator,
        now: Timestamp,
    ) -> Result<AdjustOutcome, LedgerError> {
        if let Some(rid) = request_id {
            if let Some(prior) = self.replay_of(user_id, rid)? {
                return Ok(AdjustOutcome::Replayed(prior.id));
            }
        }
        if ops.is_empty() {
            return Err(LedgerError::EmptyAdjustment);
        }

        let current = self.balances.get(&user_id);
        let mut after: BTreeMap<Currency, Amount> = BTreeMap::new();
        for op in ops {
            if op.amount.is_zero() {
                return Err(LedgerError::ZeroAmount {
                    currency: op.currency.clone(),
                });
            }
            let base = after
                .get(&op.currency)
                .copied()
                .or_else(|| current.and_then(|b| b.get(&op.currency)).copied())
                .unwrap_or_default();
            let next = base.checked_add(op.amount).ok_or_else(|| LedgerError::Overflow {
                currency: op.currency.clone(),
            })?;
            after.insert(op.currency.clone(), next);
        }

        let audit_id = AuditId(self.next_audit_id);
        let record = FundAuditRecord {
            id: audit_id,
            user_id,
            operator_id: operator.id,
            operator_role: operator.role,
            request_id: request_id.cloned(),
            reason: reason.to_string(),
            deltas: ops.to_vec(),
            balances_after: after
                .iter()
                .map(|(c, a)| CurrencyAmount::new(c.clone(), *a))
                .collect(),
            created_at: now,
        };

        let balances = &mut self.balances;
        let audit = &mut self.audit;
        let applied = self.guard.apply(request_id, audit_id, || {
            balances.entry(user_id).or_default().extend(after);
            audit.push(record);
        });

        match applied {
            Ok(Guarded::Applied(())) => {
                self.next_audit_id += 1;
                Ok(AdjustOutcome::Applied(audit_id))
            }
            Ok(Guarded::Replayed(prior)) => Ok(AdjustOutcome::Replayed(prior)),
            Err(GuardError::AlreadyClaimed { request_id, .. }) => {
                Err(LedgerError::ReplayRefused { request_id })
            }
        }
    }

    /// Witnesses `request_id` for a step that moved no money, so a retry of
    /// that step still replays. The row carries no deltas.
    pub fn mark(
        &mut self,
        user_id: UserId,
        reason: &str,
        request_id: &RequestId,
        operator: &Operator,
        now: Timestamp,
    ) -> Result<AdjustOutcome, LedgerError> {
        if let Some(prior) = self.replay_of(user_id, request_id)? {
            return Ok(AdjustOutcome::Replayed(prior.id));
        }
        let audit_id = AuditId(self.next_audit_id);
        self.guard
            .claim(request_id, audit_id)
            .map_err(|_| LedgerError::ReplayRefused {
                request_id: request_id.clone(),
            })?;
        self.audit.push(FundAuditRecord {
            id: audit_id,
            user_id,
            operator_id: operator.id,
            operator_role: operator.role,
            request_id: Some(request_id.clone()),
            reason: reason.to_string(),
            deltas: Vec::new(),
            balances_after: Vec::new(),
            created_at: now,
        });
        self.next_audit_id += 1;
        Ok(AdjustOutcome::Applied(audit_id))
    }

    /// The audit row that already witnessed `request_id`, if any. A witness
    /// written for another user is a conflict, never a replay.
    pub fn replay_of(
        &self,
        user_id: UserId,
        request_id: &RequestId,
    ) -> Result<Option<&FundAuditRecord>, LedgerError> {
        let Some(record) = self.audit_for_request(request_id) else {
            return Ok(None);
        };
        if record.user_id != user_id {
            return Err(LedgerError::RequestIdConflict {
                request_id: request_id.clone(),
                owner: record.user_id,
            });
        }
        Ok(Some(record))
    }

    pub fn read(&self, user_id: UserId) -> BTreeMap<Currency, Amount> {
        self.balances.get(&user_id).cloned().unwrap_or_default()
    }

    pub fn balance(&self, user_id: UserId, currency: &Currency) -> Amount {
        self.balances
            .get(&user_id)
            .and_then(|b| b.get(currency))
            .copied()
            .unwrap_or_default()
    }

    /// Sum of every user's balance in one currency.
    pub fn total(&self, currency: &Currency) -> Amount {
        self.balances
            .values()
            .filter_map(|b| b.get(currency))
            .sum()
    }

    pub fn is_witnessed(&self, request_id: &RequestId) -> bool {
        self.guard.witness_of(request_id).is_some()
    }

    pub fn audit_records(&self) -> &[FundAuditRecord] {
        &self.audit
    }

    pub fn audit_record(&self, id: AuditId) -> Option<&FundAuditRecord> {
        // ids are dense and start at 1
        let idx = usize::try_from(id.0).ok()?.checked_sub(1)?;
        self.audit.get(idx).filter(|r| r.id == id)
    }

    pub fn audit_for_request(&self, request_id: &RequestId) -> Option<&FundAuditRecord> {
        self.guard
            .witness_of(request_id)
            .and_then(|id| self.audit_record(id))
    }

    pub fn audit_for_user(&self, user_id: UserId) -> Vec<&FundAuditRecord> {
        self.audit.iter().filter(|r| r.user_id == user_id).collect()
    }

    pub fn rows(&self) -> Vec<BalanceRow> {
        self.balances
            .iter()
            .flat_map(|(user_id, per_currency)| {
                per_currency.iter().map(move |(currency, amount)| BalanceRow {
                    user_id: *user_id,
                    currency: currency.clone(),
                    amount: *amount,
                })
            })
            .collect()
    }

    /// Rebuild from persisted rows. The idempotency witnesses come back from
    /// the audit log itself.
    pub fn from_rows(rows: Vec<BalanceRow>, audit: Vec<FundAuditRecord>) -> Result<Self, LedgerError> {
        let mut guard = IdempotencyGuard::new();
        for (idx, record) in audit.iter().enumerate() {
            if record.id.0 != idx as u64 + 1 {
                return Err(LedgerError::CorruptAudit(format!(
                    "audit record {} out of sequence at position {}",
                    record.id.0,
                    idx + 1
                )));
            }
            if let Some(rid) = &record.request_id {
                guard
                    .claim(rid, record.id)
                    .map_err(|e| LedgerError::CorruptAudit(e.to_string()))?;
            }
        }

        let mut balances: BTreeMap<UserId, BTreeMap<Currency, Amount>> = BTreeMap::new();
        for row in rows {
            balances.entry(row.user_id).or_default().insert(row.currency, row.amount);
        }

        Ok(Self {
            balances,
            next_audit_id: audit.len() as u64 + 1,
            audit,
            guard,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Adjustment carries no currency deltas")]
    EmptyAdjustment,

    #[error("Zero delta for {currency}")]
    ZeroAmount { currency: Currency },

    #[error("Balance overflow in {currency}")]
    Overflow { currency: Currency },

    #[error("Request {request_id} was claimed concurrently, refusing to re-apply")]
    ReplayRefused { request_id: RequestId },

    #[error("Request {request_id} already belongs to user {owner:?}")]
    RequestIdConflict { request_id: RequestId, owner: UserId },

    #[error("Corrupt audit log: {0}")]
    CorruptAudit(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usd() -> Currency {
        Currency::usd()
    }

    fn credit(amount: rust_decimal::Decimal) -> Vec<CurrencyAmount> {
        vec![CurrencyAmount::new(usd(), Amount::new(amount))]
    }

    #[test]
    fn adjust_writes_one_audit_row() {
        let mut ledger = BalanceLedger::new();
        let op = Operator::new(9, Role::Admin);
        let out = ledger
            .adjust(UserId(1), &credit(dec!(100)), "deposit", None, &op, Timestamp::from_millis(5))
            .unwrap();

        assert_eq!(out, AdjustOutcome::Applied(AuditId(1)));
        assert_eq!(ledger.balance(UserId(1), &usd()).value(), dec!(100));
        let record = ledger.audit_record(AuditId(1)).unwrap();
        assert_eq!(record.operator_id, 9);
        assert_eq!(record.balances_after[0].amount.value(), dec!(100));
    }

    #[test]
    fn replayed_request_applies_nothing() {
        let mut ledger = BalanceLedger::new();
        let op = Operator::system();
        let rid = RequestId::new("dep-1");
        let now = Timestamp::from_millis(0);

        ledger.adjust(UserId(1), &credit(dec!(50)), "deposit", Some(&rid), &op, now).unwrap();
        let again = ledger
            .adjust(UserId(1), &credit(dec!(50)), "deposit", Some(&rid), &op, now)
            .unwrap();

        assert_eq!(again, AdjustOutcome::Replayed(AuditId(1)));
        assert_eq!(ledger.balance(UserId(1), &usd()).value(), dec!(50));
        assert_eq!(ledger.audit_records().len(), 1);
    }

    #[test]
    fn multi_currency_call_is_one_record() {
        let mut ledger = BalanceLedger::new();
        let ops = vec![
            CurrencyAmount::new(usd(), Amount::new(dec!(10))),
            CurrencyAmount::new(Currency::mxn(), Amount::new(dec!(-3))),
        ];
        ledger
            .adjust(UserId(2), &ops, "swap", None, &Operator::system(), Timestamp::from_millis(0))
            .unwrap();

        assert_eq!(ledger.audit_records().len(), 1);
        assert_eq!(ledger.balance(UserId(2), &Currency::mxn()).value(), dec!(-3));
        assert_eq!(ledger.read(UserId(2)).len(), 2);
    }

    #[test]
    fn invalid_delta_rejects_whole_call() {
        let mut ledger = BalanceLedger::new();
        let ops = vec![
            CurrencyAmount::new(usd(), Amount::new(dec!(10))),
            CurrencyAmount::new(Currency::mxn(), Amount::zero()),
        ];
        let err = ledger
            .adjust(UserId(3), &ops, "bad", None, &Operator::system(), Timestamp::from_millis(0))
            .unwrap_err();

        assert!(matches!(err, LedgerError::ZeroAmount { .. }));
        assert!(ledger.read(UserId(3)).is_empty());
        assert!(ledger.audit_records().is_empty());
        assert!(matches!(
            ledger.adjust(UserId(3), &[], "empty", None, &Operator::system(), Timestamp::from_millis(0)),
            Err(LedgerError::EmptyAdjustment)
        ));
    }

    #[test]
    fn witness_from_another_user_is_a_conflict() {
        let mut ledger = BalanceLedger::new();
        let rid = RequestId::new("shared");
        let now = Timestamp::from_millis(0);
        ledger
            .adjust(UserId(1), &credit(dec!(5)), "x", Some(&rid), &Operator::system(), now)
            .unwrap();

        let err = ledger
            .adjust(UserId(2), &credit(dec!(5)), "x", Some(&rid), &Operator::system(), now)
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::RequestIdConflict {
                request_id: rid,
                owner: UserId(1)
            }
        );
        assert!(ledger.read(UserId(2)).is_empty());
    }

    #[test]
    fn mark_witnesses_without_moving_money() {
        let mut ledger = BalanceLedger::new();
        let rid = RequestId::new("flat-step");
        let now = Timestamp::from_millis(0);

        let first = ledger.mark(UserId(1), "no-op", &rid, &Operator::system(), now).unwrap();
        let again = ledger.mark(UserId(1), "no-op", &rid, &Operator::system(), now).unwrap();
        assert_eq!(first, AdjustOutcome::Applied(AuditId(1)));
        assert_eq!(again, AdjustOutcome::Replayed(AuditId(1)));
        assert!(ledger.read(UserId(1)).is_empty());
        assert!(ledger.audit_record(AuditId(1)).unwrap().delta(&usd()).is_zero());

        let replay = ledger
            .adjust(UserId(1), &credit(dec!(3)), "x", Some(&rid), &Operator::system(), now)
            .unwrap();
        assert!(matches!(replay, AdjustOutcome::Replayed(AuditId(1))));
        assert_eq!(ledger.audit_records().len(), 1);
    }

    #[test]
    fn rows_rebuild_witnesses() {
        let mut ledger = BalanceLedger::new();
        let rid = RequestId::new("r");
        ledger
            .adjust(UserId(1), &credit(dec!(7)), "x", Some(&rid), &Operator::system(), Timestamp::from_millis(0))
            .unwrap();

        let restored =
            BalanceLedger::from_rows(ledger.rows(), ledger.audit_records().to_vec()).unwrap();
        assert!(restored.is_witnessed(&rid));
        assert_eq!(restored.balance(UserId(1), &usd()).value(), dec!(7));
        assert_eq!(restored.audit_for_request(&rid).unwrap().id, AuditId(1));
    }
}
