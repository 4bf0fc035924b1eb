// 10.0: credit lines. a user applies for an amount over a period, a super admin approves
// or rejects. approval credits the balance (engine side) and opens a debt due at
// approved_at + period, at least one day out.

use crate::timer::MILLIS_PER_DAY;
use crate::types::{Amount, CreditAppId, Currency, DebtId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

pub const MAX_CREDIT_SCORE: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditPeriodUnit {
    Day,
    Month,
    Year,
}

impl CreditPeriodUnit {
    pub fn days(&self) -> i64 {
        match self {
            CreditPeriodUnit::Day => 1,
            CreditPeriodUnit::Month => 30,
            CreditPeriodUnit::Year => 365,
        }
    }
}

impl FromStr for CreditPeriodUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(CreditPeriodUnit::Day),
            "month" => Ok(CreditPeriodUnit::Month),
            "year" => Ok(CreditPeriodUnit::Year),
            other => Err(format!("Unknown credit period unit: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebtStatus {
    Active,
    Settled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditApplication {
    pub id: CreditAppId,
    pub user_id: UserId,
    pub amount: Amount,
    pub currency: Currency,
    pub score: u32,
    pub period_value: u32,
    pub period_unit: CreditPeriodUnit,
    pub status: CreditStatus,
    pub reviewer_id: Option<u64>,
    pub notes: Option<String>,
    pub debt_id: Option<DebtId>,
    pub created_at: Timestamp,
    pub reviewed_at: Option<Timestamp>,
}

impl CreditApplication {
    pub fn period_days(&self) -> i64 {
        (i64::from(self.period_value) * self.period_unit.days()).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditDebt {
    pub id: DebtId,
    pub app_id: CreditAppId,
    pub user_id: UserId,
    pub amount: Amount,
    pub currency: Currency,
    pub status: DebtStatus,
    pub due_at: Timestamp,
    pub created_at: Timestamp,
    pub settled_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreditRequest {
    pub amount: Amount,
    pub currency: Currency,
    pub score: u32,
    pub period_value: u32,
    pub period_unit: CreditPeriodUnit,
}

#[derive(Debug, Clone, Default)]
pub struct CreditDesk {
    apps: BTreeMap<CreditAppId, CreditApplication>,
    debts: BTreeMap<DebtId, CreditDebt>,
    next_app_id: u64,
    next_debt_id: u64,
}

impl CreditDesk {
    pub fn new() -> Self {
        Self {
            apps: BTreeMap::new(),
            debts: BTreeMap::new(),
            next_app_id: 1,
            next_debt_id: 1,
        }
    }

    pub fn apply(&mut self, user_id: UserId, req: CreditRequest, now: Timestamp) -> Result<CreditAppId, CreditError> {
        if !req.amount.is_positive() {
            return Err(CreditError::NonPositiveAmount(req.amount));
        }
        if req.score > MAX_CREDIT_SCORE {
            return Err(CreditError::InvalidScore(req.score));
        }
        if self
            .apps
            .values()
            .any(|a| a.user_id == user_id && a.status == CreditStatus::Pending)
        {
            return Err(CreditError::PendingApplicationExists(user_id));
        }

        let id = CreditAppId(self.next_app_id);
        self.next_app_id += 1;
        self.apps.insert(
            id,
            CreditApplication {
                id,
                user_id,
                amount: req.amount,
                currency: req.currency,
                score: req.score,
                period_value: req.period_value,
                period_unit: req.period_unit,
                status: CreditStatus::Pending,
                reviewer_id: None,
                notes: None,
                debt_id: None,
                created_at: now,
                reviewed_at: None,
            },
        );
        Ok(id)
    }

    pub fn pending(&self, id: CreditAppId) -> Result<&CreditApplication, CreditError> {
        let app = self.apps.get(&id).ok_or(CreditError::ApplicationNotFound(id))?;
        if app.status != CreditStatus::Pending {
            return Err(CreditError::AlreadyReviewed { id, status: app.status });
        }
        Ok(app)
    }

    /// Marks the application approved and opens its debt.
    pub fn approve(&mut self, id: CreditAppId, reviewer_id: u64, now: Timestamp) -> Result<&CreditDebt, CreditError> {
        let app = self.pending(id)?;
        let debt_id = DebtId(self.next_debt_id);
        let debt = CreditDebt {
            id: debt_id,
            app_id: id,
            user_id: app.user_id,
            amount: app.amount,
            currency: app.currency.clone(),
            status: DebtStatus::Active,
            due_at: now.plus_millis(app.period_days() * MILLIS_PER_DAY),
            created_at: now,
            settled_at: None,
        };
        self.next_debt_id += 1;

        if let Some(app) = self.apps.get_mut(&id) {
            app.status = CreditStatus::Approved;
            app.reviewer_id = Some(reviewer_id);
            app.reviewed_at = Some(now);
            app.debt_id = Some(debt_id);
        }
        Ok(self.debts.entry(debt_id).or_insert(debt))
    }

    pub fn reject(
        &mut self,
        id: CreditAppId,
        reviewer_id: u64,
        notes: Option<String>,
        now: Timestamp,
    ) -> Result<&CreditApplication, CreditError> {
        self.pending(id)?;
        let app = self.apps.get_mut(&id).ok_or(CreditError::ApplicationNotFound(id))?;
        app.status = CreditStatus::Rejected;
        app.reviewer_id = Some(reviewer_id);
        app.notes = notes;
        app.reviewed_at = Some(now);
        Ok(app)
    }

    /// Active debts with `due_at <= now`.
    pub fn due_debts(&self, now: Timestamp) -> Vec<&CreditDebt> {
        self.debts
            .values()
            .filter(|d| d.status == DebtStatus::Active && d.due_at <= now)
            .collect()
    }

    pub fn active_debt(&self, id: DebtId) -> Result<&CreditDebt, CreditError> {
        let debt = self.debts.get(&id).ok_or(CreditError::DebtNotFound(id))?;
        if debt.status != DebtStatus::Active {
            return Err(CreditError::DebtSettled(id));
        }
        Ok(debt)
    }

    pub fn mark_settled(&mut self, id: DebtId, now: Timestamp) -> Result<&CreditDebt, CreditError> {
        self.active_debt(id)?;
        let debt = self.debts.get_mut(&id).ok_or(CreditError::DebtNotFound(id))?;
        debt.status = DebtStatus::Settled;
        debt.settled_at = Some(now);
        Ok(debt)
    }

    pub fn application(&self, id: CreditAppId) -> Option<&CreditApplication> {
        self.apps.get(&id)
    }

    pub fn debt(&self, id: DebtId) -> Option<&CreditDebt> {
        self.debts.get(&id)
    }

    pub fn applications_for(&self, user_id: UserId) -> Vec<&CreditApplication> {
        self.apps.values().filter(|a| a.user_id == user_id).collect()
    }

    /// (next application id, next debt id)
    pub fn next_ids(&self) -> (u64, u64) {
        (self.next_app_id, self.next_debt_id)
    }

    pub fn resume_from(&mut self, next_app_id: u64, next_debt_id: u64) {
        self.next_app_id = self.next_app_id.max(next_app_id);
        self.next_debt_id = self.next_debt_id.max(next_debt_id);
    }

    pub fn rows(&self) -> (Vec<CreditApplication>, Vec<CreditDebt>) {
        (
            self.apps.values().cloned().collect(),
            self.debts.values().cloned().collect(),
        )
    }

    pub fn from_rows(apps: Vec<CreditApplication>, debts: Vec<CreditDebt>) -> Self {
        let mut desk = Self::new();
        for app in apps {
            desk.next_app_id = desk.next_app_id.max(app.id.0 + 1);
            desk.apps.insert(app.id, app);
        }
        for debt in debts {
            desk.next_debt_id = desk.next_debt_id.max(debt.id.0 + 1);
            desk.debts.insert(debt.id, debt);
        }
        desk
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreditError {
    #[error("Credit application not found: {0:?}")]
    ApplicationNotFound(CreditAppId),

    #[error("Debt not found: {0:?}")]
    DebtNotFound(DebtId),

    #[error("Credit amount must be positive, got {0}")]
    NonPositiveAmount(Amount),

    #[error("Credit score {0} out of range")]
    InvalidScore(u32),

    #[error("User {0:?} already has a pending credit application")]
    PendingApplicationExists(UserId),

    #[error("Application {id:?} already reviewed ({status:?})")]
    AlreadyReviewed { id: CreditAppId, status: CreditStatus },

    #[error("Debt {0:?} already settled")]
    DebtSettled(DebtId),
}
