//! logmeta Metadata Store - Replicated log metadata service
//!
//! This crate implements the state machine that maps every log to the
//! consensus group serving it. Committed operations are applied
//! deterministically on every replica; administrative requests are served
//! by the leader's query path, which proposes new operations to its own
//! group. A background health monitor evicts peers whose heartbeats stop
//! and closes the logs they hosted.

pub mod directory;
pub mod load_rank;
pub mod monitor;
pub mod ops;
pub mod rpc;
pub mod state;
pub mod state_machine;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use directory::{PeerDirectory, PeerRecord, PeerSnapshot};
pub use load_rank::{LoadRank, PeerLoad};
pub use monitor::{CycleReport, HealthMonitor, MonitorHandle};
pub use ops::{ChangeStateReply, LogRequest, MetaOp, MetaReply, MetaRequest};
pub use rpc::{GroupHost, PeerClient};
pub use state::{MetaSnapshot, MetaState};
pub use state_machine::MetaStateMachine;
