// 12.0 snapshot.rs: whole-engine persistence. every logical table is written as
// flat rows into one versioned JSON document. id counters are stored as issued;
// derived state (withdrawal holds, idempotency witnesses, position keys) is
// rebuilt on restore.

use crate::commission::CommissionRecord;
use crate::credit::{CreditApplication, CreditDebt};
use crate::engine::EngineConfig;
use crate::ledger::{BalanceRow, FundAuditRecord};
use crate::position::Position;
use crate::trade::{BlockTradeItem, FundProduct, IpoListing, Order};
use crate::types::{Timestamp, UserId};
use crate::withdraw::WithdrawOrder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralRow {
    pub user_id: UserId,
    pub inviter_id: UserId,
}

/// Next id each book will issue. Zero means "derive from the rows".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdCounters {
    pub block_items: u64,
    pub block_orders: u64,
    pub fund_products: u64,
    pub fund_orders: u64,
    pub ipo_listings: u64,
    pub ipo_orders: u64,
    pub positions: u64,
    pub commissions: u64,
    pub withdrawals: u64,
    pub credit_applications: u64,
    pub credit_debts: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub format_version: u32,
    pub clock: Timestamp,
    pub next_event_id: u64,
    #[serde(default)]
    pub counters: IdCounters,
    pub config: EngineConfig,
    pub balances: Vec<BalanceRow>,
    pub audit: Vec<FundAuditRecord>,
    pub positions: Vec<Position>,
    pub block_items: Vec<BlockTradeItem>,
    pub block_orders: Vec<Order>,
    pub fund_products: Vec<FundProduct>,
    pub fund_orders: Vec<Order>,
    pub ipo_listings: Vec<IpoListing>,
    pub ipo_orders: Vec<Order>,
    pub commissions: Vec<CommissionRecord>,
    pub withdrawals: Vec<WithdrawOrder>,
    pub credit_applications: Vec<CreditApplication>,
    pub credit_debts: Vec<CreditDebt>,
    pub referrals: Vec<ReferralRow>,
}

impl EngineSnapshot {
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string_pretty(self).map_err(|e| SnapshotError::Encode(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let snapshot: EngineSnapshot =
            serde_json::from_str(json).map_err(|e| SnapshotError::Decode(e.to_string()))?;
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.format_version,
                expected: SNAPSHOT_FORMAT_VERSION,
            });
        }
        Ok(snapshot)
    }

    /// Writes next to `path` first, then renames over it, so a crash never
    /// leaves a half-written snapshot behind.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| SnapshotError::Io(e.to_string()))?;
        }
        let json = self.to_json()?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| SnapshotError::Io(e.to_string()))?;
        fs::rename(&tmp, path).map_err(|e| SnapshotError::Io(e.to_string()))?;
        info!(path = %path.display(), clock = %self.clock, audit = self.audit.len(), "snapshot saved");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| SnapshotError::Io(format!("{}: {}", path.display(), e)))?;
        let snapshot = Self::from_json(&json)?;
        info!(path = %path.display(), clock = %snapshot.clock, "snapshot loaded");
        Ok(snapshot)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot I/O failed: {0}")]
    Io(String),

    #[error("Snapshot encode failed: {0}")]
    Encode(String),

    #[error("Snapshot decode failed: {0}")]
    Decode(String),

    #[error("Unsupported snapshot version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Snapshot is inconsistent: {0}")]
    Corrupt(String),
}
