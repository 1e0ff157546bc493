//! Durable key/value storage for Driftsync.
//!
//! Provides the [`PersistentStore`] abstraction the sync engine writes its
//! queue and cache snapshots through, plus two implementations:
//! - [`MemoryStore`] for tests and ephemeral use
//! - [`LocalStore`] backed by the local filesystem with atomic writes

pub mod local;
pub mod memory;
pub mod store;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use store::PersistentStore;
