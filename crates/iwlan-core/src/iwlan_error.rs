//! Closed taxonomy of tunnel failures.
//!
//! Everything the protocol layer or the server selector can report is folded
//! into an [`IwlanError`] before it reaches policy resolution. Equality looks
//! at the [`ErrorKind`] only; the attached cause is diagnostic text.

use std::fmt;
use std::sync::Arc;

/// Failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoError,
    /// IKE notify error received from the peer.
    IkeProtocolError(u32),
    IkeIoError,
    IkeGenericError,
    ServerSelectionFailed,
    TunnelTransformFailed,
    SimNotReady,
    SessionClosedBeforeChildOpened,
    NetworkLost,
    TunnelNotFound,
    AddressOnlyV4,
    AddressOnlyV6,
    InitTimeout,
    MobilityTimeout,
    DpdTimeout,
}

impl ErrorKind {
    /// Stable upper-case name used in logs, dumps and statistics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::NoError => "NO_ERROR",
            Self::IkeProtocolError(_) => "IKE_PROTOCOL_EXCEPTION",
            Self::IkeIoError => "IKE_INTERNAL_IO_EXCEPTION",
            Self::IkeGenericError => "IKE_GENERIC_EXCEPTION",
            Self::ServerSelectionFailed => "EPDG_SELECTOR_SERVER_SELECTION_FAILED",
            Self::TunnelTransformFailed => "TUNNEL_TRANSFORM_FAILED",
            Self::SimNotReady => "SIM_NOT_READY_EXCEPTION",
            Self::SessionClosedBeforeChildOpened => "IKE_SESSION_CLOSED_BEFORE_CHILD_SESSION_OPENED",
            Self::NetworkLost => "IKE_NETWORK_LOST_EXCEPTION",
            Self::TunnelNotFound => "TUNNEL_NOT_FOUND",
            Self::AddressOnlyV4 => "EPDG_ADDRESS_ONLY_IPV4_ALLOWED",
            Self::AddressOnlyV6 => "EPDG_ADDRESS_ONLY_IPV6_ALLOWED",
            Self::InitTimeout => "IKE_INIT_TIMEOUT",
            Self::MobilityTimeout => "IKE_MOBILITY_TIMEOUT",
            Self::DpdTimeout => "IKE_DPD_TIMEOUT",
        }
    }
}

/// A classified failure with an optional underlying cause.
#[derive(Debug, Clone)]
pub struct IwlanError {
    kind: ErrorKind,
    cause: Option<Arc<str>>,
}

impl IwlanError {
    pub const NO_ERROR: Self = Self::new(ErrorKind::NoError);

    pub const fn new(kind: ErrorKind) -> Self {
        Self { kind, cause: None }
    }

    pub const fn ike_protocol(code: u32) -> Self {
        Self::new(ErrorKind::IkeProtocolError(code))
    }

    /// Attach the underlying cause text.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<Arc<str>>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    pub const fn is_no_error(&self) -> bool {
        matches!(self.kind, ErrorKind::NoError)
    }

    /// IKE notify code, when this is a protocol error.
    pub const fn ike_code(&self) -> Option<u32> {
        match self.kind {
            ErrorKind::IkeProtocolError(code) => Some(code),
            _ => None,
        }
    }

    /// Detail string compared against `GENERIC_ERROR_TYPE` policy details.
    ///
    /// Kinds without an entry can only be matched by fallback policies.
    pub const fn generic_detail(&self) -> Option<&'static str> {
        match self.kind {
            ErrorKind::IkeIoError => Some("IO_EXCEPTION"),
            ErrorKind::ServerSelectionFailed => Some("SERVER_SELECTION_FAILED"),
            ErrorKind::TunnelTransformFailed => Some("TUNNEL_TRANSFORM_FAILED"),
            ErrorKind::NetworkLost => Some("IKE_NETWORK_LOST_EXCEPTION"),
            ErrorKind::AddressOnlyV4 => Some("EPDG_ADDRESS_ONLY_IPV4_ALLOWED"),
            ErrorKind::AddressOnlyV6 => Some("EPDG_ADDRESS_ONLY_IPV6_ALLOWED"),
            ErrorKind::InitTimeout => Some("IKE_INIT_TIMEOUT"),
            ErrorKind::MobilityTimeout => Some("IKE_MOBILITY_TIMEOUT"),
            ErrorKind::DpdTimeout => Some("IKE_DPD_TIMEOUT"),
            ErrorKind::NoError
            | ErrorKind::IkeProtocolError(_)
            | ErrorKind::IkeGenericError
            | ErrorKind::SimNotReady
            | ErrorKind::SessionClosedBeforeChildOpened
            | ErrorKind::TunnelNotFound => None,
        }
    }

    /// Classify a raw failure reported by the protocol layer.
    pub fn classify(failure: RawFailure) -> Self {
        match failure {
            RawFailure::Protocol { code, message } => {
                Self::ike_protocol(code).with_optional_cause(message)
            }
            RawFailure::InternalIo { message } => {
                Self::new(ErrorKind::IkeIoError).with_optional_cause(message)
            }
            RawFailure::NetworkLost { message } => {
                Self::new(ErrorKind::NetworkLost).with_optional_cause(message)
            }
            RawFailure::Timeout { stage, message } => {
                let kind = match stage {
                    TimeoutStage::Init => ErrorKind::InitTimeout,
                    TimeoutStage::Mobility => ErrorKind::MobilityTimeout,
                    TimeoutStage::DeadPeerDetection => ErrorKind::DpdTimeout,
                };
                Self::new(kind).with_optional_cause(message)
            }
            RawFailure::Internal { message } | RawFailure::Other { message } => {
                Self::new(ErrorKind::IkeGenericError).with_optional_cause(message)
            }
        }
    }

    fn with_optional_cause(self, message: Option<String>) -> Self {
        match message {
            Some(m) => self.with_cause(m),
            None => self,
        }
    }
}

impl Default for IwlanError {
    fn default() -> Self {
        Self::NO_ERROR
    }
}

impl PartialEq for IwlanError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for IwlanError {}

impl From<ErrorKind> for IwlanError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<RawFailure> for IwlanError {
    fn from(failure: RawFailure) -> Self {
        Self::classify(failure)
    }
}

impl fmt::Display for IwlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::IkeProtocolError(code) => write!(f, "{}({code})", self.kind.name()),
            kind => f.write_str(kind.name()),
        }
    }
}

/// Which IKE exchange timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    Init,
    Mobility,
    DeadPeerDetection,
}

/// Failure as surfaced by the tunnel protocol implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFailure {
    /// The peer answered with an IKE notify error.
    Protocol { code: u32, message: Option<String> },
    /// Internal failure wrapping a socket/retransmission I/O error.
    InternalIo { message: Option<String> },
    /// Internal failure without an I/O cause.
    Internal { message: Option<String> },
    /// The underlying network went away.
    NetworkLost { message: Option<String> },
    Timeout {
        stage: TimeoutStage,
        message: Option<String>,
    },
    Other { message: Option<String> },
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_cause() {
        let a = IwlanError::ike_protocol(24).with_cause("AUTHENTICATION_FAILED");
        let b = IwlanError::ike_protocol(24);
        assert_eq!(a, b);
        assert_ne!(a, IwlanError::ike_protocol(36));
        assert_ne!(
            IwlanError::new(ErrorKind::IkeIoError),
            IwlanError::new(ErrorKind::IkeGenericError)
        );
    }

    #[test]
    fn classify_protocol_failure_keeps_code() {
        let err = IwlanError::classify(RawFailure::Protocol {
            code: 9002,
            message: Some("NO_APN_SUBSCRIPTION".to_string()),
        });
        assert_eq!(err.ike_code(), Some(9002));
        assert_eq!(err.cause(), Some("NO_APN_SUBSCRIPTION"));
    }

    #[test]
    fn classify_wrapped_io_and_network_loss() {
        assert_eq!(
            IwlanError::classify(RawFailure::InternalIo { message: None }).kind(),
            ErrorKind::IkeIoError
        );
        assert_eq!(
            IwlanError::classify(RawFailure::NetworkLost { message: None }).kind(),
            ErrorKind::NetworkLost
        );
        assert_eq!(
            IwlanError::classify(RawFailure::Timeout {
                stage: TimeoutStage::DeadPeerDetection,
                message: None,
            })
            .kind(),
            ErrorKind::DpdTimeout
        );
    }

    #[test]
    fn unrecognized_failures_are_generic() {
        for failure in [
            RawFailure::Internal { message: None },
            RawFailure::Other {
                message: Some("boom".to_string()),
            },
        ] {
            assert_eq!(IwlanError::classify(failure).kind(), ErrorKind::IkeGenericError);
        }
    }

    #[test]
    fn generic_detail_vocabulary() {
        assert_eq!(
            IwlanError::new(ErrorKind::ServerSelectionFailed).generic_detail(),
            Some("SERVER_SELECTION_FAILED")
        );
        assert_eq!(
            IwlanError::new(ErrorKind::IkeIoError).generic_detail(),
            Some("IO_EXCEPTION")
        );
        assert_eq!(IwlanError::ike_protocol(24).generic_detail(), None);
        assert_eq!(IwlanError::new(ErrorKind::SimNotReady).generic_detail(), None);
    }

    #[test]
    fn display_includes_protocol_code() {
        assert_eq!(IwlanError::ike_protocol(24).to_string(), "IKE_PROTOCOL_EXCEPTION(24)");
        assert_eq!(IwlanError::NO_ERROR.to_string(), "NO_ERROR");
    }
}
