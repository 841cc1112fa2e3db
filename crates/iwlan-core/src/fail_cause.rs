//! Data call fail causes reported to the framework.

use std::fmt;

use crate::iwlan_error::{ErrorKind, IwlanError};

/// Cause attached to a failed or dropped data call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataFailCause {
    #[default]
    None,
    ErrorUnspecified,
    OnlyIpv4Allowed,
    OnlyIpv6Allowed,
    SimCardChanged,
    IwlanNetworkFailure,
    IwlanDnsResolutionNameFailure,
    IwlanIkev2MsgTimeout,
    IwlanIkev2AuthFailure,
    IwlanEpdgInternalAddressFailure,
    IwlanPdnConnectionRejection,
    IwlanMaxConnectionReached,
    IwlanSemanticErrorInTft,
    IwlanSyntacticalErrorInTft,
    IwlanSemanticErrorsInPacketFilters,
    IwlanSyntacticalErrorsInPacketFilters,
    IwlanNon3gppAccessToEpcNotAllowed,
    IwlanUserUnknown,
    IwlanNoApnSubscription,
    IwlanAuthorizationRejected,
    IwlanIllegalMe,
    IwlanNetworkFailureIke,
    IwlanRatTypeNotAllowed,
    IwlanImeiNotAccepted,
    IwlanPlmnNotAllowed,
    IwlanUnauthenticatedEmergencyNotSupported,
    IwlanCongestion,
    IwlanIkePrivateProtocolError,
    IwlanIkeSessionClosedBeforeChildSessionOpened,
    IwlanTunnelNotFound,
    IwlanIkeInitTimeout,
    IwlanIkeMobilityTimeout,
    IwlanIkeDpdTimeout,
    IwlanTunnelTransformFailed,
    IwlanIkeNetworkLostException,
}

impl DataFailCause {
    /// Map a classified error to the cause the framework sees.
    pub const fn from_error(error: &IwlanError) -> Self {
        match error.kind() {
            ErrorKind::NoError => Self::None,
            ErrorKind::ServerSelectionFailed => Self::IwlanDnsResolutionNameFailure,
            ErrorKind::AddressOnlyV4 => Self::OnlyIpv4Allowed,
            ErrorKind::AddressOnlyV6 => Self::OnlyIpv6Allowed,
            ErrorKind::IkeIoError => Self::IwlanIkev2MsgTimeout,
            ErrorKind::SimNotReady => Self::SimCardChanged,
            ErrorKind::SessionClosedBeforeChildOpened => {
                Self::IwlanIkeSessionClosedBeforeChildSessionOpened
            }
            ErrorKind::TunnelNotFound => Self::IwlanTunnelNotFound,
            ErrorKind::InitTimeout => Self::IwlanIkeInitTimeout,
            ErrorKind::MobilityTimeout => Self::IwlanIkeMobilityTimeout,
            ErrorKind::DpdTimeout => Self::IwlanIkeDpdTimeout,
            ErrorKind::TunnelTransformFailed => Self::IwlanTunnelTransformFailed,
            ErrorKind::NetworkLost => Self::IwlanIkeNetworkLostException,
            ErrorKind::IkeProtocolError(code) => Self::from_ike_code(code),
            ErrorKind::IkeGenericError => Self::ErrorUnspecified,
        }
    }

    const fn from_ike_code(code: u32) -> Self {
        match code {
            24 => Self::IwlanIkev2AuthFailure,
            36 => Self::IwlanEpdgInternalAddressFailure,
            8192 => Self::IwlanPdnConnectionRejection,
            8193 => Self::IwlanMaxConnectionReached,
            8241 => Self::IwlanSemanticErrorInTft,
            8242 => Self::IwlanSyntacticalErrorInTft,
            8244 => Self::IwlanSemanticErrorsInPacketFilters,
            8245 => Self::IwlanSyntacticalErrorsInPacketFilters,
            9000 => Self::IwlanNon3gppAccessToEpcNotAllowed,
            9001 => Self::IwlanUserUnknown,
            9002 => Self::IwlanNoApnSubscription,
            9003 => Self::IwlanAuthorizationRejected,
            9006 => Self::IwlanIllegalMe,
            10500 => Self::IwlanNetworkFailureIke,
            11001 => Self::IwlanRatTypeNotAllowed,
            11005 => Self::IwlanImeiNotAccepted,
            11011 => Self::IwlanPlmnNotAllowed,
            11055 => Self::IwlanUnauthenticatedEmergencyNotSupported,
            15500 => Self::IwlanCongestion,
            _ => Self::IwlanIkePrivateProtocolError,
        }
    }

    pub const fn is_none(self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Display for DataFailCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
