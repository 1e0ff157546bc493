//! Driftsync Engine
//!
//! Client-resident offline action queue and synchronization engine:
//! - Durable priority/FIFO queue of intended remote mutations
//! - Replay on connectivity restore with exponential backoff
//! - Expiring read cache with lazy eviction
//! - Write-through persistence that survives process restarts
//! - State notifications for observing callers

pub mod action;
pub mod backoff;
pub mod cache;
pub mod connectivity;
pub mod engine;
pub mod executor;
pub mod state;

// Re-export main types
pub use action::{ActionQueue, QueuedAction};
pub use backoff::BackoffPolicy;
pub use cache::{CacheEntry, ExpiringCache};
pub use connectivity::{ConnectivityObserver, ConnectivityState, ListenerHandle};
pub use engine::{EngineConfig, SyncEngine};
pub use executor::{ExecuteFailure, ExecutorResponse, RemoteExecutor};
pub use state::{EngineEvent, EngineState};
