//! Referral commission escrow.
//!
//! Commissions are credited frozen and become spendable only when the
//! engine releases them into the ledger after `frozen_until`. The escrow
//! itself never touches balances.

use crate::timer::add_days;
use crate::types::{Amount, CommissionId, Currency, OrderId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionStatus {
    Frozen,
    Released,
}

impl fmt::Display for CommissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommissionStatus::Frozen => f.write_str("frozen"),
            CommissionStatus::Released => f.write_str("released"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub id: CommissionId,
    pub inviter_id: UserId,
    pub invitee_id: UserId,
    // what earned it: "block", "fund", "ipo", or a free-form label for manual credits
    pub source: String,
    pub order_id: Option<OrderId>,
    pub amount: Amount,
    pub currency: Currency,
    pub status: CommissionStatus,
    pub frozen_until: Timestamp,
    pub created_at: Timestamp,
    pub released_at: Option<Timestamp>,
}

impl CommissionRecord {
    pub fn is_releasable(&self, now: Timestamp) -> bool {
        self.status == CommissionStatus::Frozen && self.frozen_until <= now
    }

    pub fn remaining_ms(&self, now: Timestamp) -> i64 {
        match self.status {
            CommissionStatus::Frozen => now.millis_until(self.frozen_until).max(0),
            CommissionStatus::Released => 0,
        }
    }
}

/// Per-currency frozen and released totals for one inviter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommissionSummary {
    pub frozen: BTreeMap<Currency, Amount>,
    pub released: BTreeMap<Currency, Amount>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCommission {
    pub inviter_id: UserId,
    pub invitee_id: UserId,
    pub source: String,
    pub order_id: Option<OrderId>,
    pub amount: Amount,
    pub currency: Currency,
    pub freeze_days: u32,
}

#[derive(Debug, Clone, Default)]
pub struct CommissionEscrow {
    records: BTreeMap<CommissionId, CommissionRecord>,
    next_id: u64,
}

impl CommissionEscrow {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn credit(&mut self, entry: NewCommission, now: Timestamp) -> Result<CommissionId, CommissionError> {
        if !entry.amount.is_positive() {
            return Err(CommissionError::NonPositiveAmount(entry.amount));
        }
        if entry.inviter_id == entry.invitee_id {
            return Err(CommissionError::SelfReferral(entry.inviter_id));
        }
        let id = CommissionId(self.next_id);
        self.next_id += 1;
        self.records.insert(
            id,
            CommissionRecord {
                id,
                inviter_id: entry.inviter_id,
                invitee_id: entry.invitee_id,
                source: entry.source,
                order_id: entry.order_id,
                amount: entry.amount,
                currency: entry.currency,
                status: CommissionStatus::Frozen,
                frozen_until: add_days(now, entry.freeze_days),
                created_at: now,
                released_at: None,
            },
        );
        Ok(id)
    }

    /// Frozen records whose freeze has ended. Released rows are never selected.
    pub fn due(&self, now: Timestamp) -> Vec<CommissionId> {
        self.records
            .values()
            .filter(|r| r.is_releasable(now))
            .map(|r| r.id)
            .collect()
    }

    pub fn due_for(&self, inviter_id: UserId, now: Timestamp) -> Vec<CommissionId> {
        self.records
            .values()
            .filter(|r| r.inviter_id == inviter_id && r.is_releasable(now))
            .map(|r| r.id)
            .collect()
    }

    pub fn mark_released(&mut self, id: CommissionId, now: Timestamp) -> Result<&CommissionRecord, CommissionError> {
        let record = self.records.get_mut(&id).ok_or(CommissionError::NotFound(id))?;
        if record.status == CommissionStatus::Released {
            return Err(CommissionError::AlreadyReleased(id));
        }
        if record.frozen_until > now {
            return Err(CommissionError::StillFrozen {
                id,
                frozen_until: record.frozen_until,
            });
        }
        record.status = CommissionStatus::Released;
        record.released_at = Some(now);
        Ok(record)
    }

    pub fn get(&self, id: CommissionId) -> Option<&CommissionRecord> {
        self.records.get(&id)
    }

    pub fn for_inviter(&self, inviter_id: UserId) -> Vec<&CommissionRecord> {
        self.records
            .values()
            .filter(|r| r.inviter_id == inviter_id)
            .collect()
    }

    pub fn summary(&self, inviter_id: UserId) -> CommissionSummary {
        let mut summary = CommissionSummary::default();
        for record in self.for_inviter(inviter_id) {
            let bucket = match record.status {
                CommissionStatus::Frozen => &mut summary.frozen,
                CommissionStatus::Released => &mut summary.released,
            };
            let total = bucket.entry(record.currency.clone()).or_default();
            *total = total.add(record.amount);
        }
        summary
    }

    /// Next id to be issued. Persisted so a restore never reissues an id
    /// whose row was deleted.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn resume_from(&mut self, next_id: u64) {
        self.next_id = self.next_id.max(next_id);
    }

    pub fn rows(&self) -> Vec<CommissionRecord> {
        self.records.values().cloned().collect()
    }

    pub fn from_rows(rows: Vec<CommissionRecord>) -> Self {
        let mut escrow = Self::new();
        for row in rows {
            escrow.next_id = escrow.next_id.max(row.id.0 + 1);
            escrow.records.insert(row.id, row);
        }
        escrow
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommissionError {
    #[error("Commission not found: {0:?}")]
    NotFound(CommissionId),

    #[error("Commission amount must be positive, got {0}")]
    NonPositiveAmount(Amount),

    #[error("User {0:?} cannot earn commission from themselves")]
    SelfReferral(UserId),

    #[error("Commission {0:?} already released")]
    AlreadyReleased(CommissionId),

    #[error("Commission {id:?} frozen until {frozen_until}")]
    StillFrozen { id: CommissionId, frozen_until: Timestamp },
}
