//! Request, response and link types exchanged with the framework and the
//! tunnel backend.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::Serialize;

use iwlan_core::DataFailCause;

/// Radio access network a data call is requested on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccessNetwork {
    Iwlan,
    Eutran,
    Ngran,
    Utran,
    Geran,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum IpProtocol {
    #[serde(rename = "IP")]
    Ip,
    #[serde(rename = "IPV6")]
    Ipv6,
    #[default]
    #[serde(rename = "IPV4V6")]
    Ipv4v6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestReason {
    #[default]
    Normal,
    /// The session is moving over from another transport.
    Handover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeactivateReason {
    #[default]
    Normal,
    Shutdown,
    /// The session moved to another transport.
    Handover,
}

/// Data profile attached to a setup request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataProfile {
    pub apn: String,
    pub protocol: IpProtocol,
    pub roaming_protocol: IpProtocol,
    pub is_ims: bool,
    pub is_emergency: bool,
}

impl DataProfile {
    pub fn new(apn: impl Into<String>) -> Self {
        Self {
            apn: apn.into(),
            protocol: IpProtocol::default(),
            roaming_protocol: IpProtocol::default(),
            is_ims: false,
            is_emergency: false,
        }
    }

    #[must_use]
    pub const fn ims(mut self) -> Self {
        self.is_ims = true;
        self
    }

    #[must_use]
    pub const fn emergency(mut self) -> Self {
        self.is_emergency = true;
        self
    }

    pub const fn is_ims_or_emergency(&self) -> bool {
        self.is_ims || self.is_emergency
    }
}

/// Address with its prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkAddress {
    pub addr: IpAddr,
    pub prefix_len: u8,
}

impl LinkAddress {
    pub const fn new(addr: IpAddr, prefix_len: u8) -> Self {
        Self { addr, prefix_len }
    }
}

/// Link properties the framework holds for an existing data call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkProperties {
    pub iface_name: Option<String>,
    pub addresses: Vec<LinkAddress>,
    pub dns: Vec<IpAddr>,
}

impl LinkProperties {
    pub fn first_ipv4(&self) -> Option<Ipv4Addr> {
        self.addresses.iter().find_map(|a| match a.addr {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
    }

    pub fn first_ipv6(&self) -> Option<LinkAddress> {
        self.addresses.iter().copied().find(|a| a.addr.is_ipv6())
    }
}

/// Properties negotiated for an open tunnel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TunnelLinkProperties {
    pub iface_name: String,
    pub internal_addresses: Vec<LinkAddress>,
    pub dns: Vec<IpAddr>,
    pub pcscf: Vec<IpAddr>,
}

/// A data call setup request from the framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupRequest {
    pub access_network: AccessNetwork,
    pub profile: Option<DataProfile>,
    pub is_roaming: bool,
    pub reason: RequestReason,
    /// Link properties of the call being handed over.
    pub link_properties: Option<LinkProperties>,
    pub pdu_session_id: u8,
}

impl SetupRequest {
    /// Plain IWLAN setup for `profile`.
    pub const fn new(profile: DataProfile) -> Self {
        Self {
            access_network: AccessNetwork::Iwlan,
            profile: Some(profile),
            is_roaming: false,
            reason: RequestReason::Normal,
            link_properties: None,
            pdu_session_id: 0,
        }
    }

    /// Handover of an existing call with `link_properties`.
    #[must_use]
    pub fn handover(mut self, link_properties: LinkProperties) -> Self {
        self.reason = RequestReason::Handover;
        self.link_properties = Some(link_properties);
        self
    }

    pub const fn is_handover(&self) -> bool {
        matches!(self.reason, RequestReason::Handover)
    }
}

/// What the backend needs to open a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSetupRequest {
    pub apn: String,
    pub is_roaming: bool,
    pub pdu_session_id: u8,
    pub protocol: IpProtocol,
    pub src_ipv4: Option<Ipv4Addr>,
    pub src_ipv6: Option<LinkAddress>,
    pub request_pcscf: bool,
    pub is_emergency: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkStatus {
    Inactive,
    Active,
}

/// How the framework should retry after a failed handover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum HandoverFailureMode {
    #[default]
    Legacy,
    NoFallbackRetryHandover,
    NoFallbackRetrySetupNormal,
}

/// One entry of the data call list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataCallResponse {
    pub id: i32,
    #[serde(serialize_with = "serialize_cause")]
    pub cause: DataFailCause,
    /// Milliseconds to wait before the next setup; `None` when undefined.
    pub retry_ms: Option<u64>,
    pub link_status: LinkStatus,
    pub protocol: IpProtocol,
    pub iface_name: Option<String>,
    pub addresses: Vec<LinkAddress>,
    pub dns: Vec<IpAddr>,
    pub gateways: Vec<IpAddr>,
    pub pcscf: Vec<IpAddr>,
    pub mtu: u32,
    pub pdu_session_id: u8,
    pub handover_failure_mode: HandoverFailureMode,
}

impl DataCallResponse {
    /// Bare response for `apn` with no link attached.
    pub fn inactive(apn: &str, protocol: IpProtocol) -> Self {
        Self {
            id: call_id(apn),
            cause: DataFailCause::None,
            retry_ms: None,
            link_status: LinkStatus::Inactive,
            protocol,
            iface_name: None,
            addresses: Vec::new(),
            dns: Vec::new(),
            gateways: Vec::new(),
            pcscf: Vec::new(),
            mtu: 0,
            pdu_session_id: 0,
            handover_failure_mode: HandoverFailureMode::Legacy,
        }
    }

    /// Attach link properties and report wildcard gateways for each address
    /// family present.
    pub fn with_link(&mut self, props: &TunnelLinkProperties) {
        self.iface_name = Some(props.iface_name.clone());
        self.addresses.clone_from(&props.internal_addresses);
        self.dns.clone_from(&props.dns);
        self.pcscf.clone_from(&props.pcscf);
        self.gateways.clear();
        if props.internal_addresses.iter().any(|a| a.addr.is_ipv4()) {
            self.gateways.push(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }
        if props.internal_addresses.iter().any(|a| a.addr.is_ipv6()) {
            self.gateways.push(IpAddr::V6(Ipv6Addr::UNSPECIFIED));
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_cause<S: serde::Serializer>(
    cause: &DataFailCause,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(cause)
}

/// Result code of a data service request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResultCode {
    Success,
    InvalidArg,
    TemporarilyUnavailable,
}

/// Answer to a setup request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupCompletion {
    pub result: ResultCode,
    pub response: Option<DataCallResponse>,
}

impl SetupCompletion {
    pub const fn rejected(result: ResultCode) -> Self {
        Self {
            result,
            response: None,
        }
    }

    pub const fn success(response: DataCallResponse) -> Self {
        Self {
            result: ResultCode::Success,
            response: Some(response),
        }
    }
}

/// Call id the framework uses to refer to the tunnel for `apn`.
///
/// 32-bit polynomial hash over the UTF-16 code units of the name, so ids
/// stay stable across restarts and match what the framework computes.
pub fn call_id(apn: &str) -> i32 {
    apn.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn call_id_is_the_polynomial_string_hash() {
        assert_eq!(call_id(""), 0);
        assert_eq!(call_id("a"), 97);
        assert_eq!(call_id("ims"), 104_399);
        // Long names wrap around.
        assert_eq!(call_id("internet.example.com"), 1_927_175_120);
        assert_ne!(call_id("ims"), call_id("mms"));
    }

    #[test]
    fn gateways_follow_address_families() {
        let mut resp = DataCallResponse::inactive("ims", IpProtocol::Ipv4v6);
        resp.with_link(&TunnelLinkProperties {
            iface_name: "ipsec0".to_string(),
            internal_addresses: vec![LinkAddress::new("2001:db8::1".parse().unwrap(), 64)],
            dns: vec![],
            pcscf: vec![],
        });
        assert_eq!(resp.gateways, vec![IpAddr::V6(Ipv6Addr::UNSPECIFIED)]);
        assert_eq!(resp.iface_name.as_deref(), Some("ipsec0"));

        resp.with_link(&TunnelLinkProperties {
            iface_name: "ipsec0".to_string(),
            internal_addresses: vec![
                LinkAddress::new("10.0.0.2".parse().unwrap(), 32),
                LinkAddress::new("2001:db8::1".parse().unwrap(), 64),
            ],
            dns: vec![],
            pcscf: vec![],
        });
        assert_eq!(resp.gateways.len(), 2);
    }

    #[test]
    fn fail_cause_serializes_by_name() {
        let mut resp = DataCallResponse::inactive("ims", IpProtocol::Ip);
        resp.cause = DataFailCause::IwlanNetworkFailure;
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["cause"], DataFailCause::IwlanNetworkFailure.to_string());
        assert_eq!(json["protocol"], "IP");
    }
}
