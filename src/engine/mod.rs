// 8.0: settlement engine. owns the ledger and every book, and drives each
// multi-step flow (approve, payout, redeem, release, withdraw, credit) so the
// ledger write and the state transition happen together. deterministic
// against its own clock; no I/O.

mod commissions;
mod config;
mod core;
mod credit;
mod funds;
mod orders;
mod persist;
mod positions;
mod results;
mod sweep;
mod withdrawals;

pub use config::EngineConfig;
pub use core::Engine;
pub use results::{
    ApprovalResult, EngineError, ErrorKind, ForceCloseResult, PayoutReport, RedeemResult, ReleaseReport, SweepReport,
};
