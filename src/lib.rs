// ledger-core: multi-asset ledger and trade-settlement engine.
// every balance change goes through one idempotent ledger with a per-call
// audit row; instrument orders, commissions, withdrawals and credit lines are
// state machines layered on top. deterministic against its own clock.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: ids, Currency, Amount, Price, RequestId, Timestamp
//   2.x  access.rs: roles and permissions
//   2.5  idempotency.rs: request-id witnesses
//   3.x  ledger.rs: multi-currency balances + fund audit trail
//   4.x  position.rs: long/short legs, averaging, realized pnl
//   5.x  trade/: block trade, fund and IPO/RWA order lifecycle
//   6.x  timer.rs: intervals, payout boundaries, lock state
//   7.x  config.rs: AppConfig, yaml loading
//   8.x  engine/: engine flows tying the books to the ledger
//   9.x  commission.rs: referral commission escrow
//   9.5  withdraw.rs: withdrawal state machine + holds
//   10.x credit.rs: credit applications and debts
//   11.x events.rs: state transition events + notifier seam
//   12.x snapshot.rs: versioned JSON persistence
//   13.x shared.rs: thread-safe engine handle
//   14.x logging.rs: tracing subscriber setup

// ledger and books
pub mod access;
pub mod commission;
pub mod credit;
pub mod engine;
pub mod events;
pub mod idempotency;
pub mod ledger;
pub mod position;
pub mod timer;
pub mod trade;
pub mod types;
pub mod withdraw;

// process integration
pub mod config;
pub mod logging;
pub mod shared;
pub mod snapshot;

// re exports for convenience
pub use access::*;
pub use commission::*;
pub use credit::*;
pub use engine::*;
pub use events::*;
pub use idempotency::*;
pub use ledger::*;
pub use position::*;
pub use timer::*;
pub use trade::*;
pub use types::*;
pub use withdraw::*;
pub use config::{AppConfig, ConfigError};
pub use logging::init_logging;
pub use shared::SharedEngine;
pub use snapshot::{EngineSnapshot, IdCounters, ReferralRow, SnapshotError, SNAPSHOT_FORMAT_VERSION};
