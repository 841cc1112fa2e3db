//! Default network state shared by every slot.

use serde::Serialize;
use tracing::{debug, error};

use crate::registry::SlotId;
use crate::tunnel::types::LinkProperties;

/// Transport carrying the default network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Transport {
    #[default]
    Unspecified,
    Mobile,
    Wifi,
}

/// Opaque handle of the platform network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NetworkId(pub u64);

/// Update delivered by the network monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkUpdate {
    /// Default network became available, changed or was lost.
    Connectivity {
        connected: bool,
        transport: Transport,
        network: Option<NetworkId>,
    },
    LinkPropertiesChanged {
        network: NetworkId,
        link_properties: LinkProperties,
    },
    /// Subscription currently carrying cellular data moved.
    ActiveDataSlot(Option<SlotId>),
}

/// What the slots must do after an update was applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkReaction {
    /// Force close tunnels that are being torn down.
    pub close_deactivating: bool,
    /// Push the network to the backend; `Some(true)` also force-cleans
    /// bring-ups in flight.
    pub update_network: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkState {
    pub connected: bool,
    pub transport: Transport,
    pub network: Option<NetworkId>,
    pub link_properties: Option<LinkProperties>,
    pub active_data_slot: Option<SlotId>,
}

impl NetworkState {
    /// Whether `slot` can reach the gateway.
    ///
    /// With cellular data active on another slot and cross-SIM calling on,
    /// any connected default network will do; otherwise it must be Wi-Fi.
    pub fn is_connected_for(&self, slot: SlotId, cross_sim_enabled: bool) -> bool {
        let data_on_other_slot = self.active_data_slot.is_some_and(|active| active != slot);
        if data_on_other_slot && cross_sim_enabled {
            self.connected
        } else {
            self.transport == Transport::Wifi && self.connected
        }
    }

    pub fn default_is_cellular(&self) -> bool {
        self.transport == Transport::Mobile
    }

    pub fn apply(&mut self, update: NetworkUpdate) -> NetworkReaction {
        match update {
            NetworkUpdate::Connectivity {
                connected,
                transport,
                network,
            } => self.set_connected(connected, transport, network),
            NetworkUpdate::LinkPropertiesChanged {
                network,
                link_properties,
            } => {
                if self.network != Some(network)
                    || self.link_properties.as_ref() == Some(&link_properties)
                {
                    return NetworkReaction::default();
                }
                debug!(?network, "link properties changed");
                self.link_properties = Some(link_properties);
                NetworkReaction {
                    close_deactivating: false,
                    update_network: Some(false),
                }
            }
            NetworkUpdate::ActiveDataSlot(slot) => {
                self.active_data_slot = slot;
                NetworkReaction::default()
            }
        }
    }

    fn set_connected(
        &mut self,
        connected: bool,
        transport: Transport,
        network: Option<NetworkId>,
    ) -> NetworkReaction {
        if self.connected == connected && self.network == network && self.transport == transport {
            return NetworkReaction::default();
        }
        if connected && transport == Transport::Unspecified {
            error!(?network, "connected network update without a transport, ignoring");
            return NetworkReaction::default();
        }

        let network_changed = self.network != network;
        let transport_changed = self.transport != transport;
        debug!(
            connected,
            ?transport,
            ?network,
            network_changed,
            transport_changed,
            "default network updated"
        );
        self.connected = connected;
        self.transport = transport;
        if network_changed {
            self.link_properties = None;
        }
        self.network = network;

        if !connected {
            return NetworkReaction {
                close_deactivating: true,
                update_network: None,
            };
        }
        NetworkReaction {
            close_deactivating: transport_changed,
            update_network: (network_changed || transport_changed).then_some(true),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn wifi(id: u64) -> NetworkUpdate {
        NetworkUpdate::Connectivity {
            connected: true,
            transport: Transport::Wifi,
            network: Some(NetworkId(id)),
        }
    }

    #[test]
    fn reachability_depends_on_transport_and_cross_sim() {
        let slot0 = SlotId::new(0);
        let slot1 = SlotId::new(1);
        let mut state = NetworkState::default();
        assert!(!state.is_connected_for(slot0, false));

        state.apply(NetworkUpdate::Connectivity {
            connected: true,
            transport: Transport::Mobile,
            network: Some(NetworkId(7)),
        });
        assert!(!state.is_connected_for(slot0, true));

        state.apply(NetworkUpdate::ActiveDataSlot(Some(slot1)));
        assert!(state.is_connected_for(slot0, true));
        assert!(!state.is_connected_for(slot0, false));
        assert!(!state.is_connected_for(slot1, true));
        assert!(state.default_is_cellular());

        state.apply(wifi(8));
        assert!(state.is_connected_for(slot1, false));
    }

    #[test]
    fn unchanged_and_unspecified_updates_are_ignored() {
        let mut state = NetworkState::default();
        assert_ne!(state.apply(wifi(1)), NetworkReaction::default());
        assert_eq!(state.apply(wifi(1)), NetworkReaction::default());

        let reaction = state.apply(NetworkUpdate::Connectivity {
            connected: true,
            transport: Transport::Unspecified,
            network: Some(NetworkId(2)),
        });
        assert_eq!(reaction, NetworkReaction::default());
        assert_eq!(state.network, Some(NetworkId(1)));
    }

    #[test]
    fn network_change_force_cleans_and_transport_change_closes_deactivating() {
        let mut state = NetworkState::default();
        state.apply(wifi(1));

        let reaction = state.apply(wifi(2));
        assert_eq!(reaction.update_network, Some(true));
        assert!(!reaction.close_deactivating);

        let reaction = state.apply(NetworkUpdate::Connectivity {
            connected: true,
            transport: Transport::Mobile,
            network: Some(NetworkId(2)),
        });
        assert_eq!(reaction.update_network, Some(true));
        assert!(reaction.close_deactivating);
    }

    #[test]
    fn loss_closes_deactivating_tunnels() {
        let mut state = NetworkState::default();
        state.apply(wifi(1));
        let reaction = state.apply(NetworkUpdate::Connectivity {
            connected: false,
            transport: Transport::Unspecified,
            network: None,
        });
        assert!(reaction.close_deactivating);
        assert_eq!(reaction.update_network, None);
        assert!(!state.connected);
    }

    #[test]
    fn link_properties_only_apply_to_the_current_network() {
        let mut state = NetworkState::default();
        state.apply(wifi(1));
        let props = LinkProperties {
            iface_name: Some("wlan0".to_string()),
            ..LinkProperties::default()
        };

        let stale = state.apply(NetworkUpdate::LinkPropertiesChanged {
            network: NetworkId(9),
            link_properties: props.clone(),
        });
        assert_eq!(stale, NetworkReaction::default());

        let fresh = state.apply(NetworkUpdate::LinkPropertiesChanged {
            network: NetworkId(1),
            link_properties: props.clone(),
        });
        assert_eq!(fresh.update_network, Some(false));
        assert_eq!(state.link_properties, Some(props));
    }
}
