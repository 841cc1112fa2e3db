//! Boundary to the secure tunnel implementation.

use std::fmt;

use tokio::sync::mpsc;

use iwlan_core::IwlanError;

use super::types::{LinkProperties, TunnelLinkProperties, TunnelSetupRequest};
use crate::dispatch::network::NetworkId;
use crate::dispatch::{DispatchError, Event};
use crate::registry::SlotId;

/// Opens and closes tunnels on behalf of one or more slots.
///
/// Calls come from the dispatcher worker and must not block. Outcomes are
/// reported later through the [`TunnelCallback`] handed in with the call;
/// implementations must not report from inside the call itself (spawn a task
/// instead), since the worker only sees callbacks after the call returns.
pub trait TunnelBackend: Send + Sync + fmt::Debug {
    /// Start opening a tunnel. Returns `false` when the request is refused
    /// outright, in which case no callback follows.
    fn bring_up_tunnel(&self, request: TunnelSetupRequest, callback: TunnelCallback) -> bool;

    /// Close the tunnel for `apn`. `force_close` skips the graceful delete
    /// exchange. A `tunnel_closed` callback always follows.
    fn close_tunnel(&self, apn: &str, force_close: bool, callback: TunnelCallback);

    /// Move open tunnels onto a new underlying network.
    fn update_network(&self, network: Option<NetworkId>, link_properties: Option<&LinkProperties>);
}

/// Sender side of the tunnel callbacks for one slot.
///
/// Holds only a weak reference to the queue, so outstanding callbacks do not
/// keep a stopped dispatcher alive.
#[derive(Debug, Clone)]
pub struct TunnelCallback {
    slot: SlotId,
    tx: mpsc::WeakSender<Event>,
}

impl TunnelCallback {
    pub(crate) const fn new(slot: SlotId, tx: mpsc::WeakSender<Event>) -> Self {
        Self { slot, tx }
    }

    pub const fn slot(&self) -> SlotId {
        self.slot
    }

    /// The tunnel for `apn` is up with `props`.
    pub async fn tunnel_opened(
        &self,
        apn: &str,
        props: TunnelLinkProperties,
    ) -> Result<(), DispatchError> {
        self.send(Event::TunnelOpened {
            slot: self.slot,
            apn: apn.to_string(),
            props,
        })
        .await
    }

    /// The tunnel for `apn` is gone; `error` is `NoError` for a clean close.
    pub async fn tunnel_closed(&self, apn: &str, error: IwlanError) -> Result<(), DispatchError> {
        self.send(Event::TunnelClosed {
            slot: self.slot,
            apn: apn.to_string(),
            error,
            backoff_secs: None,
        })
        .await
    }

    /// The peer rejected the tunnel and asked for `backoff_secs` before the
    /// next attempt.
    pub async fn tunnel_closed_with_backoff(
        &self,
        apn: &str,
        error: IwlanError,
        backoff_secs: u64,
    ) -> Result<(), DispatchError> {
        self.send(Event::TunnelClosed {
            slot: self.slot,
            apn: apn.to_string(),
            error,
            backoff_secs: Some(backoff_secs),
        })
        .await
    }

    async fn send(&self, event: Event) -> Result<(), DispatchError> {
        let tx = self.tx.upgrade().ok_or(DispatchError::WorkerGone)?;
        tx.send(event).await.map_err(|_| DispatchError::WorkerGone)
    }
}
