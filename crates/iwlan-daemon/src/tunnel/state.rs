//! Per-APN tunnel state.

use std::fmt;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::oneshot;

use super::types::{IpProtocol, ResultCode, SetupCompletion, TunnelLinkProperties};

/// Lifecycle phase of one tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TunnelPhase {
    Down,
    BringingUp,
    Up,
    BringingDown,
    /// A bring-up that was force-closed because the network changed under it.
    ForceCleaningFromBringUp,
}

impl TunnelPhase {
    /// Label used in dumps.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Down => "DOWN",
            Self::BringingUp => "IN BRINGUP",
            Self::Up => "UP",
            Self::BringingDown => "IN BRINGDOWN",
            Self::ForceCleaningFromBringUp => "IN FORCE CLEAN WAS IN BRINGUP",
        }
    }

    /// Whether the tunnel never finished opening.
    pub const fn is_bringing_up(self) -> bool {
        matches!(self, Self::BringingUp | Self::ForceCleaningFromBringUp)
    }
}

impl fmt::Display for TunnelPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Everything tracked for a tunnel between setup and close.
#[derive(Debug)]
pub struct TunnelState {
    pub phase: TunnelPhase,
    pub protocol: IpProtocol,
    pub pdu_session_id: u8,
    pub is_handover: bool,
    pub is_ims_or_emergency: bool,
    pub link_properties: Option<TunnelLinkProperties>,
    pub bring_up_started_at: Instant,
    pub up_since: Option<Instant>,
    pending_setup: Option<oneshot::Sender<SetupCompletion>>,
    pending_deactivate: Option<oneshot::Sender<ResultCode>>,
}

impl TunnelState {
    pub const fn bringing_up(
        protocol: IpProtocol,
        pdu_session_id: u8,
        is_handover: bool,
        is_ims_or_emergency: bool,
        now: Instant,
        reply: oneshot::Sender<SetupCompletion>,
    ) -> Self {
        Self {
            phase: TunnelPhase::BringingUp,
            protocol,
            pdu_session_id,
            is_handover,
            is_ims_or_emergency,
            link_properties: None,
            bring_up_started_at: now,
            up_since: None,
            pending_setup: Some(reply),
            pending_deactivate: None,
        }
    }

    pub const fn is_up(&self) -> bool {
        matches!(self.phase, TunnelPhase::Up)
    }

    pub fn mark_up(&mut self, props: TunnelLinkProperties, now: Instant) {
        self.phase = TunnelPhase::Up;
        self.link_properties = Some(props);
        self.up_since = Some(now);
    }

    pub fn begin_bring_down(&mut self, reply: oneshot::Sender<ResultCode>) {
        self.phase = TunnelPhase::BringingDown;
        self.pending_deactivate = Some(reply);
    }

    /// Answer the pending setup, if any. A dropped receiver is ignored.
    pub fn complete_setup(&mut self, completion: SetupCompletion) -> bool {
        self.pending_setup
            .take()
            .is_some_and(|tx| tx.send(completion).is_ok())
    }

    /// Answer the pending deactivate, if any. A dropped receiver is ignored.
    pub fn complete_deactivate(&mut self, result: ResultCode) -> bool {
        self.pending_deactivate
            .take()
            .is_some_and(|tx| tx.send(result).is_ok())
    }
}

/// Tunnel entry in a dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelSnapshot {
    pub apn: String,
    pub phase: &'static str,
    pub protocol: IpProtocol,
    pub pdu_session_id: u8,
    pub is_handover: bool,
    pub is_ims_or_emergency: bool,
    pub link_properties: Option<TunnelLinkProperties>,
}

impl TunnelSnapshot {
    pub fn of(apn: &str, state: &TunnelState) -> Self {
        Self {
            apn: apn.to_string(),
            phase: state.phase.label(),
            protocol: state.protocol,
            pdu_session_id: state.pdu_session_id,
            is_handover: state.is_handover,
            is_ims_or_emergency: state.is_ims_or_emergency,
            link_properties: state.link_properties.clone(),
        }
    }
}
