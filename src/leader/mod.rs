//! Lease-based leader election.
//!
//! A `LeaseStore` holds the shared lease record; the `LeaderElector`
//! campaigns for it and turns lease status into `LeadershipEvent`s.

mod elector;
mod sqlite_store;
mod store;

pub use elector::{ElectionError, ElectorSettings, LeaderElector, LeadershipEvent};
pub use sqlite_store::SqliteLeaseStore;
pub use store::{InMemoryLeaseStore, LeaseRecord, LeaseStore};
