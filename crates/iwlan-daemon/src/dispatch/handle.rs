//! Cloneable entry points into the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use iwlan_core::{DataFailCause, IwlanError, IwlanEvent};

use super::DispatchError;
use super::event::{CarrierConfig, Event};
use super::network::{NetworkState, NetworkUpdate};
use super::worker::{ServiceDump, SlotContext};
use crate::listener::Subscriber;
use crate::registry::{SlotId, SlotRegistry};
use crate::tunnel::{
    DataCallResponse, DeactivateReason, ResultCode, SetupCompletion, SetupRequest, SlotNotice,
    TunnelPhase,
};

async fn send(tx: &mpsc::Sender<Event>, event: Event) -> Result<(), DispatchError> {
    tx.send(event).await.map_err(|_| DispatchError::WorkerGone)
}

async fn await_reply<T>(rx: oneshot::Receiver<T>) -> Result<T, DispatchError> {
    rx.await.map_err(|_| DispatchError::ReplyDropped)
}

/// Service-wide handle: slot lifecycle, network updates and shutdown.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Event>,
    registry: Arc<SlotRegistry>,
    list_changed_capacity: usize,
}

impl DispatcherHandle {
    pub(crate) const fn new(
        tx: mpsc::Sender<Event>,
        registry: Arc<SlotRegistry>,
        list_changed_capacity: usize,
    ) -> Self {
        Self {
            tx,
            registry,
            list_changed_capacity,
        }
    }

    /// Create the per-slot state on the worker and register a handle for it.
    pub async fn add_slot(&self, slot: SlotId) -> Result<SlotHandle, DispatchError> {
        if self.registry.contains(slot) {
            return Err(DispatchError::DuplicateSlot(slot));
        }
        let (notices, _) = broadcast::channel(self.list_changed_capacity);
        let (reply, rx) = oneshot::channel();
        send(
            &self.tx,
            Event::AddSlot {
                slot,
                notices: notices.clone(),
                reply,
            },
        )
        .await?;
        await_reply(rx).await??;

        let handle = SlotHandle {
            slot,
            tx: self.tx.clone(),
            notices,
        };
        self.registry.insert(handle.clone())?;
        debug!(%slot, "slot handle registered");
        Ok(handle)
    }

    /// Force close the slot's tunnels and drop its state. Requests still
    /// waiting on those tunnels are answered first. Unknown slots are only
    /// logged.
    pub async fn remove_slot(&self, slot: SlotId) -> Result<(), DispatchError> {
        if self.registry.remove(slot).is_none() {
            warn!(%slot, "remove for unregistered slot");
            return Ok(());
        }
        send(&self.tx, Event::RemoveSlot { slot }).await
    }

    pub fn slot(&self, slot: SlotId) -> Result<SlotHandle, DispatchError> {
        self.registry
            .get(slot)
            .ok_or(DispatchError::UnknownSlot(slot))
    }

    pub async fn network_changed(&self, update: NetworkUpdate) -> Result<(), DispatchError> {
        send(&self.tx, Event::Network(update)).await
    }

    pub async fn dump(&self) -> Result<ServiceDump, DispatchError> {
        let (reply, rx) = oneshot::channel();
        send(&self.tx, Event::Dump { reply }).await?;
        await_reply(rx).await
    }

    /// Ask the worker to stop once the events queued so far are handled.
    pub async fn shutdown(&self) -> Result<(), DispatchError> {
        send(&self.tx, Event::Shutdown).await
    }

    pub fn registry(&self) -> &SlotRegistry {
        &self.registry
    }
}

/// Per-slot request surface.
///
/// Every call is serialized through the dispatcher queue, so calls made from
/// one task are handled in the order they were made.
#[derive(Debug, Clone)]
pub struct SlotHandle {
    slot: SlotId,
    tx: mpsc::Sender<Event>,
    notices: broadcast::Sender<SlotNotice>,
}

impl SlotHandle {
    pub const fn slot(&self) -> SlotId {
        self.slot
    }

    /// Data call list changes and unthrottled APNs for this slot.
    pub fn subscribe(&self) -> broadcast::Receiver<SlotNotice> {
        self.notices.subscribe()
    }

    /// Run `f` on the worker against this slot's state and return its result.
    async fn query<T, F>(&self, f: F) -> Result<T, DispatchError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SlotContext, &NetworkState) -> T + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        send(
            &self.tx,
            Event::Query {
                slot: self.slot,
                run: Box::new(move |ctx, network| {
                    let _ = reply.send(f(ctx, network));
                }),
            },
        )
        .await?;
        await_reply(rx).await
    }

    /// Resolves once the setup is answered, which for a new tunnel is after
    /// the backend reported the outcome.
    pub async fn setup_data_call(
        &self,
        request: SetupRequest,
    ) -> Result<SetupCompletion, DispatchError> {
        let (reply, rx) = oneshot::channel();
        send(
            &self.tx,
            Event::SetupDataCall {
                slot: self.slot,
                request,
                reply,
            },
        )
        .await?;
        await_reply(rx).await
    }

    pub async fn deactivate_data_call(
        &self,
        cid: i32,
        reason: DeactivateReason,
    ) -> Result<ResultCode, DispatchError> {
        let (reply, rx) = oneshot::channel();
        send(
            &self.tx,
            Event::DeactivateDataCall {
                slot: self.slot,
                cid,
                reason,
                reply,
            },
        )
        .await?;
        await_reply(rx).await
    }

    pub async fn data_call_list(&self) -> Result<Vec<DataCallResponse>, DispatchError> {
        self.query(|ctx, network| ctx.orchestrator.data_call_list(network))
            .await
    }

    pub async fn tunnel_phase(&self, apn: &str) -> Result<TunnelPhase, DispatchError> {
        let apn = apn.to_string();
        self.query(move |ctx, _| ctx.orchestrator.phase(&apn)).await
    }

    /// Record `error` for `apn`; returns the retry delay in seconds.
    pub async fn report_error(
        &self,
        apn: &str,
        error: IwlanError,
    ) -> Result<Option<u64>, DispatchError> {
        self.report(apn, error, None).await
    }

    pub async fn report_error_with_backoff(
        &self,
        apn: &str,
        error: IwlanError,
        backoff_secs: u64,
    ) -> Result<Option<u64>, DispatchError> {
        self.report(apn, error, Some(backoff_secs)).await
    }

    async fn report(
        &self,
        apn: &str,
        error: IwlanError,
        backoff_secs: Option<u64>,
    ) -> Result<Option<u64>, DispatchError> {
        let (reply, rx) = oneshot::channel();
        send(
            &self.tx,
            Event::ReportError {
                slot: self.slot,
                apn: apn.to_string(),
                error,
                backoff_secs,
                reply,
            },
        )
        .await?;
        await_reply(rx).await
    }

    pub async fn can_bring_up(&self, apn: &str) -> Result<bool, DispatchError> {
        let apn = apn.to_string();
        self.query(move |ctx, _| ctx.ledger.can_bring_up(&apn)).await
    }

    pub async fn current_retry_time(&self, apn: &str) -> Result<Option<Duration>, DispatchError> {
        let apn = apn.to_string();
        self.query(move |ctx, _| ctx.ledger.current_retry_time(&apn))
            .await
    }

    pub async fn current_fqdn_index(
        &self,
        num_fqdns: usize,
    ) -> Result<Option<usize>, DispatchError> {
        self.query(move |ctx, _| ctx.ledger.current_fqdn_index(num_fqdns))
            .await
    }

    pub async fn should_retry_with_initial_attach(&self, apn: &str) -> Result<bool, DispatchError> {
        let apn = apn.to_string();
        self.query(move |ctx, _| ctx.ledger.should_retry_with_initial_attach(&apn))
            .await
    }

    pub async fn last_error(&self, apn: &str) -> Result<IwlanError, DispatchError> {
        let apn = apn.to_string();
        self.query(move |ctx, _| ctx.ledger.last_error(&apn)).await
    }

    pub async fn data_fail_cause(&self, apn: &str) -> Result<DataFailCause, DispatchError> {
        let apn = apn.to_string();
        self.query(move |ctx, _| ctx.ledger.data_fail_cause(&apn))
            .await
    }

    pub async fn most_recent_data_fail_cause(&self) -> Result<DataFailCause, DispatchError> {
        self.query(|ctx, _| ctx.ledger.most_recent_data_fail_cause())
            .await
    }

    /// Events the retry ledger is currently subscribed to.
    pub async fn subscribed_events(&self) -> Result<Vec<IwlanEvent>, DispatchError> {
        self.query(|ctx, _| {
            ctx.subscriptions
                .events_of(Subscriber::Ledger)
                .into_iter()
                .collect()
        })
        .await
    }

    pub async fn carrier_config_changed(&self, config: CarrierConfig) -> Result<(), DispatchError> {
        send(
            &self.tx,
            Event::CarrierConfigChanged {
                slot: self.slot,
                config,
            },
        )
        .await
    }

    pub async fn notify_event(&self, event: IwlanEvent) -> Result<(), DispatchError> {
        send(
            &self.tx,
            Event::SlotEvent {
                slot: self.slot,
                event,
            },
        )
        .await
    }

    pub async fn call_state_changed(&self, on_call: bool) -> Result<(), DispatchError> {
        send(
            &self.tx,
            Event::CallStateChanged {
                slot: self.slot,
                on_call,
            },
        )
        .await
    }

    pub async fn force_close_all(&self) -> Result<(), DispatchError> {
        send(&self.tx, Event::ForceCloseAll { slot: self.slot }).await
    }
}
