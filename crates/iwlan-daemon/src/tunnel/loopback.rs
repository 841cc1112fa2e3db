//! In-process tunnel backend.
//!
//! Opens every tunnel immediately with synthetic addresses unless a failure
//! was scripted for the APN. Used by the binary's `run` command and by tests.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::{DashMap, DashSet};
use tracing::{debug, warn};

use iwlan_core::IwlanError;

use super::backend::{TunnelBackend, TunnelCallback};
use super::types::{IpProtocol, LinkAddress, LinkProperties, TunnelLinkProperties, TunnelSetupRequest};
use crate::dispatch::network::NetworkId;

/// Scripted outcome for the next bring-ups of an APN.
#[derive(Debug, Clone)]
struct Failure {
    error: IwlanError,
    backoff_secs: Option<u64>,
}

#[derive(Debug, Default)]
pub struct LoopbackBackend {
    failures: DashMap<String, Failure>,
    refused: DashSet<String>,
    next_iface: AtomicU32,
    network_updates: AtomicU32,
}

impl LoopbackBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every bring-up for `apn` fail with `error` until cleared.
    pub fn fail_with(&self, apn: &str, error: IwlanError) {
        self.failures.insert(
            apn.to_string(),
            Failure {
                error,
                backoff_secs: None,
            },
        );
    }

    /// Like [`fail_with`](Self::fail_with) but the failure carries a backoff.
    pub fn fail_with_backoff(&self, apn: &str, error: IwlanError, backoff_secs: u64) {
        self.failures.insert(
            apn.to_string(),
            Failure {
                error,
                backoff_secs: Some(backoff_secs),
            },
        );
    }

    /// Refuse bring-ups for `apn` synchronously.
    pub fn refuse(&self, apn: &str) {
        self.refused.insert(apn.to_string());
    }

    pub fn clear(&self, apn: &str) {
        self.failures.remove(apn);
        self.refused.remove(apn);
    }

    /// Number of network updates received.
    pub fn network_updates(&self) -> u32 {
        self.network_updates.load(Ordering::SeqCst)
    }

    fn link_properties(&self, request: &TunnelSetupRequest) -> TunnelLinkProperties {
        let n = self.next_iface.fetch_add(1, Ordering::SeqCst);
        let host = u8::try_from(n % 250 + 2).unwrap_or(2);
        let mut internal_addresses = Vec::new();
        if matches!(request.protocol, IpProtocol::Ip | IpProtocol::Ipv4v6) {
            internal_addresses.push(LinkAddress::new(
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, host)),
                32,
            ));
        }
        if matches!(request.protocol, IpProtocol::Ipv6 | IpProtocol::Ipv4v6) {
            internal_addresses.push(LinkAddress::new(
                IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, u16::from(host))),
                64,
            ));
        }
        let pcscf = if request.request_pcscf {
            vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10))]
        } else {
            Vec::new()
        };
        TunnelLinkProperties {
            iface_name: format!("ipsec{n}"),
            internal_addresses,
            dns: vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 53))],
            pcscf,
        }
    }
}

impl TunnelBackend for LoopbackBackend {
    fn bring_up_tunnel(&self, request: TunnelSetupRequest, callback: TunnelCallback) -> bool {
        if self.refused.contains(&request.apn) {
            return false;
        }
        let failure = self.failures.get(&request.apn).map(|f| f.value().clone());
        let props = self.link_properties(&request);
        debug!(slot = %callback.slot(), apn = %request.apn, failing = failure.is_some(), "loopback bring-up");

        tokio::spawn(async move {
            let apn = request.apn;
            let sent = match failure {
                Some(Failure {
                    error,
                    backoff_secs: Some(secs),
                }) => callback.tunnel_closed_with_backoff(&apn, error, secs).await,
                Some(Failure { error, .. }) => callback.tunnel_closed(&apn, error).await,
                None => callback.tunnel_opened(&apn, props).await,
            };
            if let Err(e) = sent {
                warn!(apn, error = %e, "loopback callback not delivered");
            }
        });
        true
    }

    fn close_tunnel(&self, apn: &str, force_close: bool, callback: TunnelCallback) {
        debug!(slot = %callback.slot(), apn, force_close, "loopback close");
        let apn = apn.to_string();
        tokio::spawn(async move {
            if let Err(e) = callback.tunnel_closed(&apn, IwlanError::NO_ERROR).await {
                warn!(apn, error = %e, "loopback callback not delivered");
            }
        });
    }

    fn update_network(&self, network: Option<NetworkId>, link_properties: Option<&LinkProperties>) {
        debug!(?network, has_link_properties = link_properties.is_some(), "loopback network update");
        self.network_updates.fetch_add(1, Ordering::SeqCst);
    }
}
