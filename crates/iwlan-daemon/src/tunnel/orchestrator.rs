//! Per-slot tunnel state machine.
//!
//! ```text
//! Down --setup--> BringingUp --opened--> Up --deactivate--> BringingDown --closed--> Down
//! BringingUp --closed(error)--> Down             (setup answered with a retry hint)
//! BringingUp --network change--> ForceCleaningFromBringUp --closed--> Down
//! Up --closed(unsolicited)--> Down               (data call list re-broadcast)
//! ```
//!
//! Every mutation happens on the dispatcher worker; the orchestrator itself
//! is plain, unsynchronized state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use iwlan_core::config::{StatsConfig, TunnelConfig};
use iwlan_core::iwlan_error::ErrorKind;
use iwlan_core::{Clock, DataFailCause, IwlanError, IwlanEvent};

use super::SlotNotice;
use super::backend::{TunnelBackend, TunnelCallback};
use super::state::{TunnelPhase, TunnelSnapshot, TunnelState};
use super::stats::{TunnelStats, TunnelStatsSnapshot};
use super::types::{
    AccessNetwork, DataCallResponse, DeactivateReason, HandoverFailureMode, LinkStatus,
    ResultCode, SetupCompletion, SetupRequest, TunnelLinkProperties, TunnelSetupRequest, call_id,
};
use crate::dispatch::network::NetworkState;
use crate::ledger::RetryLedger;
use crate::registry::SlotId;

/// Slot-level switches toggled by platform events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlotFlags {
    pub carrier_config_ready: bool,
    pub wfc_enabled: bool,
    pub cross_sim_enabled: bool,
    pub on_call: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorDump {
    pub slot: SlotId,
    pub network_connected: bool,
    pub flags: SlotFlags,
    pub tunnels: Vec<TunnelSnapshot>,
    pub stats: TunnelStatsSnapshot,
}

/// Drives every tunnel of one slot.
#[derive(Debug)]
pub struct TunnelOrchestrator {
    slot: SlotId,
    backend: Arc<dyn TunnelBackend>,
    callback: TunnelCallback,
    clock: Arc<dyn Clock>,
    config: TunnelConfig,
    tunnels: BTreeMap<String, TunnelState>,
    stats: TunnelStats,
    notices: broadcast::Sender<SlotNotice>,
    flags: SlotFlags,
}

impl TunnelOrchestrator {
    pub fn new(
        callback: TunnelCallback,
        backend: Arc<dyn TunnelBackend>,
        clock: Arc<dyn Clock>,
        config: TunnelConfig,
        stats: &StatsConfig,
        notices: broadcast::Sender<SlotNotice>,
    ) -> Self {
        Self {
            slot: callback.slot(),
            backend,
            callback,
            clock,
            config,
            tunnels: BTreeMap::new(),
            stats: TunnelStats::new(stats),
            notices,
            flags: SlotFlags::default(),
        }
    }

    pub const fn slot(&self) -> SlotId {
        self.slot
    }

    pub const fn flags(&self) -> SlotFlags {
        self.flags
    }

    /// Phase of the tunnel for `apn`; `Down` when none is tracked.
    pub fn phase(&self, apn: &str) -> TunnelPhase {
        self.tunnels
            .get(apn)
            .map_or(TunnelPhase::Down, |state| state.phase)
    }

    pub fn tunnel_count(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_network_connected(&self, network: &NetworkState) -> bool {
        network.is_connected_for(self.slot, self.flags.cross_sim_enabled)
    }

    pub fn setup_data_call(
        &mut self,
        request: SetupRequest,
        reply: oneshot::Sender<SetupCompletion>,
        network: &NetworkState,
    ) {
        let reject = |reply: oneshot::Sender<SetupCompletion>, result| {
            let _ = reply.send(SetupCompletion::rejected(result));
        };

        let profile = match &request.profile {
            Some(profile)
                if request.access_network == AccessNetwork::Iwlan
                    && !(request.is_handover() && request.link_properties.is_none()) =>
            {
                profile
            }
            _ => {
                warn!(slot = %self.slot, ?request, "invalid setup request");
                return reject(reply, ResultCode::InvalidArg);
            }
        };
        let apn = profile.apn.clone();

        if !self.is_network_connected(network) {
            info!(slot = %self.slot, apn, "setup rejected, network not connected");
            return reject(reply, ResultCode::TemporarilyUnavailable);
        }

        if let Some(state) = self.tunnels.get(&apn) {
            if state.pdu_session_id == request.pdu_session_id && state.is_up() {
                debug!(slot = %self.slot, apn, "tunnel already up");
                let response = build_response(&apn, state, &self.config, network);
                let _ = reply.send(SetupCompletion::success(response));
            } else {
                warn!(
                    slot = %self.slot,
                    apn,
                    phase = %state.phase,
                    "setup for an apn with a tunnel in flight, force closing it"
                );
                self.backend.close_tunnel(&apn, true, self.callback.clone());
                reject(reply, ResultCode::TemporarilyUnavailable);
            }
            return;
        }

        let is_handover = request.is_handover();
        let (src_ipv4, src_ipv6) = match (&request.link_properties, is_handover) {
            (Some(props), true) => (props.first_ipv4(), props.first_ipv6()),
            _ => (None, None),
        };
        let protocol = if request.is_roaming {
            profile.roaming_protocol
        } else {
            profile.protocol
        };
        let setup = TunnelSetupRequest {
            apn: apn.clone(),
            is_roaming: request.is_roaming,
            pdu_session_id: request.pdu_session_id,
            protocol,
            src_ipv4,
            src_ipv6,
            request_pcscf: profile.is_ims_or_emergency(),
            is_emergency: profile.is_emergency,
        };

        self.tunnels.insert(
            apn.clone(),
            TunnelState::bringing_up(
                protocol,
                request.pdu_session_id,
                is_handover,
                profile.is_ims_or_emergency(),
                self.clock.now(),
                reply,
            ),
        );
        info!(slot = %self.slot, apn, is_handover, ?protocol, "bringing up tunnel");

        if !self.backend.bring_up_tunnel(setup, self.callback.clone()) {
            warn!(slot = %self.slot, apn, "backend refused bring-up");
            if let Some(mut state) = self.tunnels.remove(&apn) {
                state.complete_setup(SetupCompletion::rejected(ResultCode::InvalidArg));
            }
        }
    }

    pub fn deactivate_data_call(
        &mut self,
        cid: i32,
        reason: DeactivateReason,
        reply: oneshot::Sender<ResultCode>,
        network: &NetworkState,
    ) {
        let Some(apn) = self.tunnels.keys().find(|apn| call_id(apn) == cid).cloned() else {
            warn!(slot = %self.slot, cid, "deactivate for unknown call id");
            let _ = reply.send(ResultCode::InvalidArg);
            return;
        };
        let force_close =
            !self.is_network_connected(network) || reason == DeactivateReason::Handover;
        if let Some(state) = self.tunnels.get_mut(&apn) {
            state.begin_bring_down(reply);
        }
        info!(slot = %self.slot, apn, ?reason, force_close, "bringing down tunnel");
        self.backend.close_tunnel(&apn, force_close, self.callback.clone());
    }

    pub fn on_tunnel_opened(
        &mut self,
        apn: &str,
        props: TunnelLinkProperties,
        ledger: &mut RetryLedger,
        network: &NetworkState,
    ) {
        ledger.report_error(apn, &IwlanError::NO_ERROR);

        let Some(state) = self.tunnels.get_mut(apn) else {
            warn!(slot = %self.slot, apn, "tunnel opened for an unknown apn");
            return;
        };
        if state.phase != TunnelPhase::BringingUp {
            debug!(slot = %self.slot, apn, phase = %state.phase, "ignoring late tunnel open");
            return;
        }

        let now = self.clock.now();
        self.stats
            .report_setup_success(apn, now.saturating_duration_since(state.bring_up_started_at));
        state.mark_up(props, now);
        info!(slot = %self.slot, apn, "tunnel up");

        let response = build_response(apn, state, &self.config, network);
        state.complete_setup(SetupCompletion::success(response));
        self.notify_list_changed(network);
    }

    pub fn on_tunnel_closed(
        &mut self,
        apn: &str,
        error: &IwlanError,
        backoff_secs: Option<u64>,
        ledger: &mut RetryLedger,
        network: &NetworkState,
    ) {
        let Some(mut state) = self.tunnels.remove(apn) else {
            if error.kind() == ErrorKind::TunnelNotFound {
                debug!(slot = %self.slot, apn, "close for an already removed tunnel");
            } else {
                warn!(slot = %self.slot, apn, %error, "tunnel closed for an unknown apn");
            }
            return;
        };
        let now = self.clock.now();
        let up_for = state.up_since.map(|since| now.saturating_duration_since(since));
        self.stats.report_down(apn, state.phase, up_for);

        match state.phase {
            phase if phase.is_bringing_up() => {
                let retry_secs = match backoff_secs {
                    Some(secs) => ledger.report_error_with_backoff(apn, error, secs),
                    None => ledger.report_error(apn, error),
                };

                let response = self.failure_response(apn, &state, ledger);
                info!(
                    slot = %self.slot,
                    apn,
                    %error,
                    ?retry_secs,
                    cause = %response.cause,
                    mode = ?response.handover_failure_mode,
                    "tunnel setup failed"
                );
                state.complete_setup(SetupCompletion::success(response));
            }
            TunnelPhase::BringingDown => {
                if !error.is_no_error() && error.kind() != ErrorKind::IkeIoError {
                    warn!(slot = %self.slot, apn, %error, "tunnel closed with error during bring-down");
                }
                state.complete_setup(SetupCompletion::rejected(ResultCode::TemporarilyUnavailable));
                state.complete_deactivate(ResultCode::Success);
                info!(slot = %self.slot, apn, "tunnel down");
            }
            _ => {
                info!(slot = %self.slot, apn, %error, "unsolicited tunnel down");
            }
        }
        self.notify_list_changed(network);
    }

    fn failure_response(
        &self,
        apn: &str,
        state: &TunnelState,
        ledger: &RetryLedger,
    ) -> DataCallResponse {
        let mut response = DataCallResponse::inactive(apn, state.protocol);
        response.handover_failure_mode = if state.is_handover
            && !(state.is_ims_or_emergency && self.flags.on_call)
            && ledger.should_retry_with_initial_attach(apn)
        {
            HandoverFailureMode::NoFallbackRetrySetupNormal
        } else if state.is_handover {
            HandoverFailureMode::NoFallbackRetryHandover
        } else {
            HandoverFailureMode::Legacy
        };

        let cause = ledger.data_fail_cause(apn);
        if cause.is_none() {
            response.cause = DataFailCause::IwlanNetworkFailure;
            response.retry_ms = Some(self.config.closed_without_error_retry_ms);
        } else {
            response.cause = cause;
            response.retry_ms = ledger.current_retry_time(apn).map(as_millis);
        }
        response
    }

    /// Responses for every tracked tunnel.
    pub fn data_call_list(&self, network: &NetworkState) -> Vec<DataCallResponse> {
        self.tunnels
            .iter()
            .map(|(apn, state)| build_response(apn, state, &self.config, network))
            .collect()
    }

    /// Force close every tunnel, e.g. when the service is unbound.
    pub fn force_close_all(&self) {
        for apn in self.tunnels.keys() {
            info!(slot = %self.slot, apn, "force closing tunnel");
            self.backend.close_tunnel(apn, true, self.callback.clone());
        }
    }

    /// Force close every tunnel and answer whatever is still pending, for a
    /// slot that is going away and will see no more callbacks.
    pub fn abandon_all(&mut self) {
        for (apn, mut state) in std::mem::take(&mut self.tunnels) {
            info!(slot = %self.slot, apn, phase = %state.phase, "abandoning tunnel");
            self.backend.close_tunnel(&apn, true, self.callback.clone());
            state.complete_setup(SetupCompletion::rejected(ResultCode::TemporarilyUnavailable));
            state.complete_deactivate(ResultCode::Success);
        }
    }

    /// Force close tunnels whose graceful teardown cannot finish anymore.
    pub fn force_close_deactivating(&self) {
        for (apn, state) in &self.tunnels {
            if state.phase == TunnelPhase::BringingDown {
                info!(slot = %self.slot, apn, "force closing tunnel in bring-down");
                self.backend.close_tunnel(apn, true, self.callback.clone());
            }
        }
    }

    /// React to a new underlying network.
    ///
    /// Only open tunnels can migrate, so with `force_clean` bring-ups in
    /// flight are abandoned and force closed.
    pub fn update_network(&mut self, network: &NetworkState, force_clean: bool) {
        if force_clean {
            for (apn, state) in &mut self.tunnels {
                if state.phase == TunnelPhase::BringingUp {
                    info!(slot = %self.slot, apn, "network changed during bring-up, force cleaning");
                    state.phase = TunnelPhase::ForceCleaningFromBringUp;
                    self.backend.close_tunnel(apn, true, self.callback.clone());
                }
            }
        }
        if self.is_network_connected(network) {
            self.backend
                .update_network(network.network, network.link_properties.as_ref());
        }
    }

    pub const fn set_on_call(&mut self, on_call: bool) {
        self.flags.on_call = on_call;
    }

    /// Handle a platform event this orchestrator subscribed to.
    pub fn on_slot_event(&mut self, event: IwlanEvent, network: &NetworkState) {
        debug!(slot = %self.slot, %event, "slot event");
        match event {
            IwlanEvent::CarrierConfigChanged => self.flags.carrier_config_ready = true,
            IwlanEvent::CarrierConfigUnknownCarrier => self.flags.carrier_config_ready = false,
            IwlanEvent::WifiCallingEnable => self.flags.wfc_enabled = true,
            IwlanEvent::WifiCallingDisable => self.flags.wfc_enabled = false,
            IwlanEvent::CrossSimCallingEnable => {
                self.flags.cross_sim_enabled = true;
                self.update_network(network, false);
            }
            IwlanEvent::CrossSimCallingDisable => self.flags.cross_sim_enabled = false,
            IwlanEvent::CallStateChanged
            | IwlanEvent::WifiDisable
            | IwlanEvent::WifiApChanged
            | IwlanEvent::ApmEnable
            | IwlanEvent::ApmDisable
            | IwlanEvent::CellInfoChanged => {}
        }
    }

    /// `apn` left its throttle window early.
    pub fn notify_apn_unthrottled(&self, apn: &str) {
        debug!(slot = %self.slot, apn, "notifying apn unthrottled");
        let _ = self.notices.send(SlotNotice::ApnUnthrottled(apn.to_string()));
    }

    fn notify_list_changed(&self, network: &NetworkState) {
        let _ = self
            .notices
            .send(SlotNotice::DataCallListChanged(self.data_call_list(network)));
    }

    pub fn dump(&self, network: &NetworkState) -> OrchestratorDump {
        OrchestratorDump {
            slot: self.slot,
            network_connected: self.is_network_connected(network),
            flags: self.flags,
            tunnels: self
                .tunnels
                .iter()
                .map(|(apn, state)| TunnelSnapshot::of(apn, state))
                .collect(),
            stats: self.stats.snapshot(),
        }
    }
}

fn build_response(
    apn: &str,
    state: &TunnelState,
    config: &TunnelConfig,
    network: &NetworkState,
) -> DataCallResponse {
    let mut response = DataCallResponse::inactive(apn, state.protocol);
    response.pdu_session_id = state.pdu_session_id;
    if state.is_up() {
        response.link_status = LinkStatus::Active;
    }
    if let Some(props) = &state.link_properties {
        response.with_link(props);
        response.mtu = if network.default_is_cellular() {
            config.cellular_link_mtu
        } else {
            config.link_mtu
        };
    }
    response
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
#[path = "orchestrator_tests.rs"]
mod tests;
