//! Tunnel lifecycle: request types, per-APN state, the orchestrator and the
//! backend boundary.

pub mod backend;
pub mod loopback;
pub mod orchestrator;
pub mod state;
pub mod stats;
pub mod types;

pub use backend::{TunnelBackend, TunnelCallback};
pub use loopback::LoopbackBackend;
pub use orchestrator::{OrchestratorDump, SlotFlags, TunnelOrchestrator};
pub use state::TunnelPhase;
pub use types::{
    DataCallResponse, DataProfile, DeactivateReason, ResultCode, SetupCompletion, SetupRequest,
    call_id,
};

/// Broadcast to everyone watching a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotNotice {
    /// The data call list changed; carries the new list.
    DataCallListChanged(Vec<DataCallResponse>),
    /// The APN left its throttle window early and may be set up again.
    ApnUnthrottled(String),
}
