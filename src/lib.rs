//! Storage-rent accounting.
//!
//! Every account pays for the bytes it keeps in the contract's data store by
//! locking a deposit (escrow) worth at least `bytes_used * cost_per_byte`.
//! The crate is layered leaves first:
//!
//! * [`cost`] — the linear byte price.
//! * [`ledger`] — per-account `{ bytes_used, escrowed }` records; the only
//!   place those numbers change, and where the coverage invariant is enforced.
//! * [`store`] — the keyed payload store whose sizes drive the ledger.
//! * [`gateway`] — deposits, withdrawals and writes, with each write and its
//!   accounting committed or rolled back together.
//! * [`contract`] — the call surface (`storage_deposit`, `set_data`,
//!   `storage_balance_of`, ...).
//! * [`state`] — JSON persistence of one contract instance between calls.

pub mod config;
pub mod contract;
pub mod cost;
pub mod gateway;
pub mod ledger;
pub mod merkle;
pub mod state;
pub mod store;
pub mod types;

pub use config::Config;
pub use contract::{CallContext, ContractError, Data, StorageContract};
pub use cost::ByteCost;
pub use gateway::StorageGateway;
pub use ledger::{LedgerError, StorageBalance, StorageLedger};
pub use state::{StateError, StateFile};
pub use store::{DataKey, KeyedDataStore, MemoryStore};
pub use types::{AccountId, Balance, StorageUsage, ONE_NEAR, U128};
