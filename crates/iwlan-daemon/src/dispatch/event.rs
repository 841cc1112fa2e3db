//! Events consumed by the dispatcher worker.

use tokio::sync::{broadcast, oneshot};

use iwlan_core::{IwlanError, IwlanEvent};

use super::DispatchError;
use super::network::{NetworkState, NetworkUpdate};
use super::worker::{ServiceDump, SlotContext};
use crate::registry::SlotId;
use crate::tunnel::SlotNotice;
use crate::tunnel::types::{
    DeactivateReason, ResultCode, SetupCompletion, SetupRequest, TunnelLinkProperties,
};

/// Carrier id used before the platform reports one.
pub const UNKNOWN_CARRIER_ID: i32 = -1;

/// Carrier configuration relevant to one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrierConfig {
    pub carrier_id: i32,
    /// Raw carrier error policy document, if the carrier supplies one.
    pub error_policy: Option<String>,
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self {
            carrier_id: UNKNOWN_CARRIER_ID,
            error_policy: None,
        }
    }
}

/// Read-only or mutating work run against one slot on the worker.
pub type SlotQuery = Box<dyn FnOnce(&mut SlotContext, &NetworkState) + Send>;

/// Everything the worker can be asked to do.
pub enum Event {
    AddSlot {
        slot: SlotId,
        notices: broadcast::Sender<SlotNotice>,
        reply: oneshot::Sender<Result<(), DispatchError>>,
    },
    RemoveSlot {
        slot: SlotId,
    },
    SetupDataCall {
        slot: SlotId,
        request: SetupRequest,
        reply: oneshot::Sender<SetupCompletion>,
    },
    DeactivateDataCall {
        slot: SlotId,
        cid: i32,
        reason: DeactivateReason,
        reply: oneshot::Sender<ResultCode>,
    },
    TunnelOpened {
        slot: SlotId,
        apn: String,
        props: TunnelLinkProperties,
    },
    TunnelClosed {
        slot: SlotId,
        apn: String,
        error: IwlanError,
        backoff_secs: Option<u64>,
    },
    ReportError {
        slot: SlotId,
        apn: String,
        error: IwlanError,
        backoff_secs: Option<u64>,
        reply: oneshot::Sender<Option<u64>>,
    },
    CarrierConfigChanged {
        slot: SlotId,
        config: CarrierConfig,
    },
    SlotEvent {
        slot: SlotId,
        event: IwlanEvent,
    },
    CallStateChanged {
        slot: SlotId,
        on_call: bool,
    },
    Network(NetworkUpdate),
    ForceCloseAll {
        slot: SlotId,
    },
    Query {
        slot: SlotId,
        run: SlotQuery,
    },
    Dump {
        reply: oneshot::Sender<ServiceDump>,
    },
    Shutdown,
}

impl Event {
    /// Short name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AddSlot { .. } => "add_slot",
            Self::RemoveSlot { .. } => "remove_slot",
            Self::SetupDataCall { .. } => "setup_data_call",
            Self::DeactivateDataCall { .. } => "deactivate_data_call",
            Self::TunnelOpened { .. } => "tunnel_opened",
            Self::TunnelClosed { .. } => "tunnel_closed",
            Self::ReportError { .. } => "report_error",
            Self::CarrierConfigChanged { .. } => "carrier_config_changed",
            Self::SlotEvent { .. } => "slot_event",
            Self::CallStateChanged { .. } => "call_state_changed",
            Self::Network(_) => "network",
            Self::ForceCloseAll { .. } => "force_close_all",
            Self::Query { .. } => "query",
            Self::Dump { .. } => "dump",
            Self::Shutdown => "shutdown",
        }
    }

    /// Slot the event is addressed to, if any.
    pub const fn slot(&self) -> Option<SlotId> {
        match self {
            Self::AddSlot { slot, .. }
            | Self::RemoveSlot { slot }
            | Self::SetupDataCall { slot, .. }
            | Self::DeactivateDataCall { slot, .. }
            | Self::TunnelOpened { slot, .. }
            | Self::TunnelClosed { slot, .. }
            | Self::ReportError { slot, .. }
            | Self::CarrierConfigChanged { slot, .. }
            | Self::SlotEvent { slot, .. }
            | Self::CallStateChanged { slot, .. }
            | Self::ForceCloseAll { slot }
            | Self::Query { slot, .. } => Some(*slot),
            Self::Network(_) | Self::Dump { .. } | Self::Shutdown => None,
        }
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name())
            .field("slot", &self.slot())
            .finish()
    }
}
