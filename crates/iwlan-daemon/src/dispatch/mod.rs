//! Event dispatcher.
//!
//! One worker task owns every slot's orchestrator, ledger and subscriptions
//! and consumes a bounded, strictly ordered queue of [`Event`]s. Request entry
//! points, tunnel callbacks, the network monitor and configuration changes
//! only ever enqueue; nothing else touches slot state.

pub mod event;
pub mod handle;
pub mod network;
pub mod worker;

pub use event::{CarrierConfig, Event, SlotQuery};
pub use handle::{DispatcherHandle, SlotHandle};
pub use network::{NetworkId, NetworkState, NetworkUpdate, Transport};
pub use worker::{Dispatcher, ServiceDump, SlotContext, SlotDump};

use crate::registry::SlotId;

/// Dispatcher errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatcher worker is not running")]
    WorkerGone,

    /// The worker dropped the request without answering, e.g. because the
    /// slot was removed while the request was pending.
    #[error("request dropped before it was answered")]
    ReplyDropped,

    #[error("unknown slot: {0}")]
    UnknownSlot(SlotId),

    #[error("slot already registered: {0}")]
    DuplicateSlot(SlotId),
}
