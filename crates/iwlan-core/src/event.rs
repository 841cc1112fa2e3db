//! Catalogue of external events the service can subscribe to.

use std::fmt;
use std::str::FromStr;

/// External signal delivered by the platform for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IwlanEvent {
    CarrierConfigChanged,
    CarrierConfigUnknownCarrier,
    WifiDisable,
    WifiApChanged,
    ApmEnable,
    ApmDisable,
    WifiCallingEnable,
    WifiCallingDisable,
    CrossSimCallingEnable,
    CrossSimCallingDisable,
    CellInfoChanged,
    CallStateChanged,
}

impl IwlanEvent {
    pub const ALL: [Self; 12] = [
        Self::CarrierConfigChanged,
        Self::CarrierConfigUnknownCarrier,
        Self::WifiDisable,
        Self::WifiApChanged,
        Self::ApmEnable,
        Self::ApmDisable,
        Self::WifiCallingEnable,
        Self::WifiCallingDisable,
        Self::CrossSimCallingEnable,
        Self::CrossSimCallingDisable,
        Self::CellInfoChanged,
        Self::CallStateChanged,
    ];

    /// Name used in policy documents and logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::CarrierConfigChanged => "CARRIER_CONFIG_CHANGED_EVENT",
            Self::CarrierConfigUnknownCarrier => "CARRIER_CONFIG_UNKNOWN_CARRIER_EVENT",
            Self::WifiDisable => "WIFI_DISABLE_EVENT",
            Self::WifiApChanged => "WIFI_AP_CHANGED_EVENT",
            Self::ApmEnable => "APM_ENABLE_EVENT",
            Self::ApmDisable => "APM_DISABLE_EVENT",
            Self::WifiCallingEnable => "WIFI_CALLING_ENABLE_EVENT",
            Self::WifiCallingDisable => "WIFI_CALLING_DISABLE_EVENT",
            Self::CrossSimCallingEnable => "CROSS_SIM_CALLING_ENABLE_EVENT",
            Self::CrossSimCallingDisable => "CROSS_SIM_CALLING_DISABLE_EVENT",
            Self::CellInfoChanged => "CELLINFO_CHANGED_EVENT",
            Self::CallStateChanged => "CALL_STATE_CHANGED_EVENT",
        }
    }

    /// Whether a policy may list this event under `UnthrottlingEvents`.
    pub const fn can_unthrottle(self) -> bool {
        matches!(
            self,
            Self::CarrierConfigChanged
                | Self::WifiDisable
                | Self::WifiApChanged
                | Self::ApmEnable
                | Self::ApmDisable
                | Self::WifiCallingDisable
        )
    }
}

impl fmt::Display for IwlanEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Event name not present in the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event: {0}")]
pub struct UnknownEvent(pub String);

impl FromStr for IwlanEvent {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|event| event.name() == name)
            .ok_or_else(|| UnknownEvent(name.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn every_catalogue_name_parses() {
        for event in IwlanEvent::ALL {
            assert_eq!(event.name().parse::<IwlanEvent>(), Ok(event));
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert_eq!(
            "SCREEN_ON_EVENT".parse::<IwlanEvent>(),
            Err(UnknownEvent("SCREEN_ON_EVENT".to_string()))
        );
    }

    #[test]
    fn only_some_events_unthrottle() {
        assert!(IwlanEvent::ApmEnable.can_unthrottle());
        assert!(IwlanEvent::WifiCallingDisable.can_unthrottle());
        assert!(!IwlanEvent::CallStateChanged.can_unthrottle());
        assert!(!IwlanEvent::WifiCallingEnable.can_unthrottle());
    }
}
