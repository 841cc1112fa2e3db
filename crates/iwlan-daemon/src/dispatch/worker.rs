//! The dispatcher worker loop.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use iwlan_core::policy::DefaultPolicies;
use iwlan_core::{Clock, IwlanEvent, PolicyStore, ServiceConfig};

use super::event::{CarrierConfig, Event};
use super::handle::DispatcherHandle;
use super::network::NetworkState;
use super::DispatchError;
use crate::ledger::{LedgerDump, RetryLedger};
use crate::listener::{EventSubscriptions, ORCHESTRATOR_EVENTS, Subscriber};
use crate::registry::{SlotId, SlotRegistry};
use crate::tunnel::{OrchestratorDump, SlotNotice, TunnelBackend, TunnelCallback, TunnelOrchestrator};

/// Per-slot state owned by the worker.
#[derive(Debug)]
pub struct SlotContext {
    pub orchestrator: TunnelOrchestrator,
    pub ledger: RetryLedger,
    pub subscriptions: EventSubscriptions,
    pub carrier: Option<CarrierConfig>,
}

impl SlotContext {
    /// Deliver `event` to every subscriber, ledger first.
    pub fn dispatch_event(&mut self, event: IwlanEvent, network: &NetworkState) {
        for subscriber in self.subscriptions.subscribers(event) {
            match subscriber {
                Subscriber::Ledger if event == IwlanEvent::CarrierConfigChanged => {
                    let carrier = self.carrier.clone().unwrap_or_default();
                    let update = self
                        .ledger
                        .on_carrier_config_changed(carrier.carrier_id, carrier.error_policy.as_deref());
                    debug!(
                        slot = %self.orchestrator.slot(),
                        reload = ?update.reload,
                        register = ?update.events.register,
                        unregister = ?update.events.unregister,
                        "carrier policies reloaded"
                    );
                    self.subscriptions.apply(Subscriber::Ledger, update.events);
                }
                Subscriber::Ledger => {
                    for apn in self.ledger.unthrottle_on_event(event) {
                        self.orchestrator.notify_apn_unthrottled(&apn);
                    }
                }
                Subscriber::Orchestrator => self.orchestrator.on_slot_event(event, network),
            }
        }
    }

    pub fn dump(&self, network: &NetworkState) -> SlotDump {
        SlotDump {
            carrier_id: self.carrier.as_ref().map(|c| c.carrier_id),
            subscribed_events: self
                .subscriptions
                .events_of(Subscriber::Ledger)
                .into_iter()
                .map(|e| e.name())
                .collect(),
            orchestrator: self.orchestrator.dump(network),
            ledger: self.ledger.dump(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotDump {
    pub carrier_id: Option<i32>,
    pub subscribed_events: Vec<&'static str>,
    pub orchestrator: OrchestratorDump,
    pub ledger: LedgerDump,
}

/// Snapshot of the whole service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDump {
    pub network: NetworkState,
    pub slots: Vec<SlotDump>,
}

/// The single consumer of the event queue.
pub struct Dispatcher {
    rx: mpsc::Receiver<Event>,
    tx: mpsc::WeakSender<Event>,
    backend: Arc<dyn TunnelBackend>,
    clock: Arc<dyn Clock>,
    defaults: Arc<DefaultPolicies>,
    config: ServiceConfig,
    slots: BTreeMap<SlotId, SlotContext>,
    network: NetworkState,
}

impl Dispatcher {
    /// Start the worker and return a handle to it.
    pub fn spawn(
        config: ServiceConfig,
        defaults: Arc<DefaultPolicies>,
        backend: Arc<dyn TunnelBackend>,
        clock: Arc<dyn Clock>,
    ) -> (DispatcherHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.dispatcher.queue_capacity.max(1));
        let handle = DispatcherHandle::new(
            tx.clone(),
            Arc::new(SlotRegistry::new()),
            config.dispatcher.list_changed_capacity.max(1),
        );
        let worker = Self {
            rx,
            tx: tx.downgrade(),
            backend,
            clock,
            defaults,
            config,
            slots: BTreeMap::new(),
            network: NetworkState::default(),
        };
        drop(tx);
        let join = tokio::spawn(worker.run());
        (handle, join)
    }

    async fn run(mut self) {
        info!(queue_capacity = self.config.dispatcher.queue_capacity, "dispatcher started");
        while let Some(event) = self.rx.recv().await {
            debug!(event = event.name(), slot = ?event.slot(), "handling event");
            if self.handle(event).is_break() {
                break;
            }
        }
        for ctx in self.slots.values_mut() {
            ctx.orchestrator.abandon_all();
        }
        info!(slots = self.slots.len(), "dispatcher stopped");
    }

    fn slot_mut(&mut self, slot: SlotId, event: &'static str) -> Option<&mut SlotContext> {
        let ctx = self.slots.get_mut(&slot);
        if ctx.is_none() {
            warn!(%slot, event, "event for unknown slot dropped");
        }
        ctx
    }

    #[allow(clippy::too_many_lines)]
    fn handle(&mut self, event: Event) -> ControlFlow<()> {
        match event {
            Event::AddSlot {
                slot,
                notices,
                reply,
            } => {
                let _ = reply.send(self.add_slot(slot, notices));
            }
            Event::RemoveSlot { slot } => match self.slots.remove(&slot) {
                Some(mut ctx) => {
                    let tunnels = ctx.orchestrator.tunnel_count();
                    ctx.orchestrator.abandon_all();
                    info!(%slot, tunnels, "slot removed");
                }
                None => warn!(%slot, "remove for unknown slot"),
            },
            Event::SetupDataCall {
                slot,
                request,
                reply,
            } => {
                let network = &self.network;
                if let Some(ctx) = self.slots.get_mut(&slot) {
                    ctx.orchestrator.setup_data_call(request, reply, network);
                } else {
                    warn!(%slot, "setup for unknown slot dropped");
                }
            }
            Event::DeactivateDataCall {
                slot,
                cid,
                reason,
                reply,
            } => {
                let network = &self.network;
                if let Some(ctx) = self.slots.get_mut(&slot) {
                    ctx.orchestrator
                        .deactivate_data_call(cid, reason, reply, network);
                } else {
                    warn!(%slot, "deactivate for unknown slot dropped");
                }
            }
            Event::TunnelOpened { slot, apn, props } => {
                let network = &self.network;
                if let Some(ctx) = self.slots.get_mut(&slot) {
                    ctx.orchestrator
                        .on_tunnel_opened(&apn, props, &mut ctx.ledger, network);
                } else {
                    debug!(%slot, apn, "tunnel opened for a removed slot");
                }
            }
            Event::TunnelClosed {
                slot,
                apn,
                error,
                backoff_secs,
            } => {
                let network = &self.network;
                if let Some(ctx) = self.slots.get_mut(&slot) {
                    ctx.orchestrator.on_tunnel_closed(
                        &apn,
                        &error,
                        backoff_secs,
                        &mut ctx.ledger,
                        network,
                    );
                } else {
                    debug!(%slot, apn, %error, "tunnel closed for a removed slot");
                }
            }
            Event::ReportError {
                slot,
                apn,
                error,
                backoff_secs,
                reply,
            } => {
                if let Some(ctx) = self.slot_mut(slot, "report_error") {
                    let retry = match backoff_secs {
                        Some(secs) => ctx.ledger.report_error_with_backoff(&apn, &error, secs),
                        None => ctx.ledger.report_error(&apn, &error),
                    };
                    let _ = reply.send(retry);
                }
            }
            Event::CarrierConfigChanged { slot, config } => {
                let network = &self.network;
                if let Some(ctx) = self.slots.get_mut(&slot) {
                    info!(%slot, carrier_id = config.carrier_id, "carrier config changed");
                    ctx.carrier = Some(config);
                    ctx.dispatch_event(IwlanEvent::CarrierConfigChanged, network);
                } else {
                    warn!(%slot, "carrier config for unknown slot dropped");
                }
            }
            Event::SlotEvent { slot, event } => {
                let network = &self.network;
                if let Some(ctx) = self.slots.get_mut(&slot) {
                    ctx.dispatch_event(event, network);
                } else {
                    warn!(%slot, %event, "event for unknown slot dropped");
                }
            }
            Event::CallStateChanged { slot, on_call } => {
                let network = &self.network;
                if let Some(ctx) = self.slots.get_mut(&slot) {
                    ctx.orchestrator.set_on_call(on_call);
                    ctx.dispatch_event(IwlanEvent::CallStateChanged, network);
                } else {
                    warn!(%slot, "call state for unknown slot dropped");
                }
            }
            Event::Network(update) => {
                let reaction = self.network.apply(update);
                for ctx in self.slots.values_mut() {
                    if reaction.close_deactivating {
                        ctx.orchestrator.force_close_deactivating();
                    }
                    if let Some(force_clean) = reaction.update_network {
                        ctx.orchestrator.update_network(&self.network, force_clean);
                    }
                }
            }
            Event::ForceCloseAll { slot } => {
                if let Some(ctx) = self.slot_mut(slot, "force_close_all") {
                    ctx.orchestrator.force_close_all();
                }
            }
            Event::Query { slot, run } => {
                let network = &self.network;
                if let Some(ctx) = self.slots.get_mut(&slot) {
                    run(ctx, network);
                } else {
                    warn!(%slot, "query for unknown slot dropped");
                }
            }
            Event::Dump { reply } => {
                let _ = reply.send(self.dump());
            }
            Event::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn add_slot(
        &mut self,
        slot: SlotId,
        notices: tokio::sync::broadcast::Sender<SlotNotice>,
    ) -> Result<(), DispatchError> {
        if self.slots.contains_key(&slot) {
            return Err(DispatchError::DuplicateSlot(slot));
        }
        let orchestrator = TunnelOrchestrator::new(
            TunnelCallback::new(slot, self.tx.clone()),
            Arc::clone(&self.backend),
            Arc::clone(&self.clock),
            self.config.tunnel.clone(),
            &self.config.stats,
            notices,
        );
        let mut ledger = RetryLedger::new(
            PolicyStore::with_defaults(Arc::clone(&self.defaults)),
            Arc::clone(&self.clock),
            &self.config.stats,
        );
        let mut subscriptions = EventSubscriptions::new();
        subscriptions.register(Subscriber::Orchestrator, ORCHESTRATOR_EVENTS);
        subscriptions.apply(Subscriber::Ledger, ledger.sync_unthrottling_events());

        self.slots.insert(
            slot,
            SlotContext {
                orchestrator,
                ledger,
                subscriptions,
                carrier: None,
            },
        );
        info!(%slot, "slot added");
        Ok(())
    }

    fn dump(&self) -> ServiceDump {
        ServiceDump {
            network: self.network.clone(),
            slots: self
                .slots
                .values()
                .map(|ctx| ctx.dump(&self.network))
                .collect(),
        }
    }
}
