//! Validated error policy rules and matching.

use std::collections::BTreeSet;
use std::fmt;

use crate::event::IwlanEvent;
use crate::iwlan_error::IwlanError;

use super::retry::RetryArray;
use super::{PolicyError, WILDCARD};

/// Vocabulary accepted in `GENERIC_ERROR_TYPE` error details.
pub const GENERIC_ERROR_DETAILS: &[&str] = &[
    WILDCARD,
    "IO_EXCEPTION",
    "TIMEOUT_EXCEPTION",
    "SERVER_SELECTION_FAILED",
    "TUNNEL_TRANSFORM_FAILED",
    "IKE_NETWORK_LOST_EXCEPTION",
    "EPDG_ADDRESS_ONLY_IPV4_ALLOWED",
    "EPDG_ADDRESS_ONLY_IPV6_ALLOWED",
    "IKE_INIT_TIMEOUT",
    "IKE_MOBILITY_TIMEOUT",
    "IKE_DPD_TIMEOUT",
];

/// Which class of errors a policy targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// `"*"`: matches every error.
    Fallback,
    /// `GENERIC_ERROR_TYPE`
    Generic,
    /// `IKE_PROTOCOL_ERROR_TYPE`
    IkeProtocol,
}

impl ErrorType {
    pub fn parse(raw: &str) -> Result<Self, PolicyError> {
        match raw.trim() {
            "IKE_PROTOCOL_ERROR_TYPE" => Ok(Self::IkeProtocol),
            "GENERIC_ERROR_TYPE" => Ok(Self::Generic),
            WILDCARD => Ok(Self::Fallback),
            other => Err(PolicyError::UnknownErrorType(other.to_string())),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Fallback => "FALLBACK_ERROR_TYPE",
            Self::Generic => "GENERIC_ERROR_TYPE",
            Self::IkeProtocol => "IKE_PROTOCOL_ERROR_TYPE",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of a policy's `ErrorDetails`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDetail {
    Wildcard,
    /// Exact IKE notify code.
    Code(u32),
    /// Inclusive IKE notify code range, `"min-max"`.
    CodeRange { min: u32, max: u32 },
    /// Exact generic detail string.
    Token(String),
}

impl ErrorDetail {
    /// Validate `raw` against the syntax allowed for `error_type`.
    pub fn parse(error_type: ErrorType, raw: &str) -> Result<Self, PolicyError> {
        let detail = raw.trim();
        if detail == WILDCARD {
            return Ok(Self::Wildcard);
        }
        let invalid = || PolicyError::InvalidErrorDetail {
            error_type,
            detail: detail.to_string(),
        };
        match error_type {
            ErrorType::IkeProtocol => {
                if let Some((min, max)) = detail.split_once('-') {
                    let min = parse_code(min).ok_or_else(invalid)?;
                    let max = parse_code(max).ok_or_else(invalid)?;
                    Ok(Self::CodeRange { min, max })
                } else {
                    parse_code(detail).map(Self::Code).ok_or_else(invalid)
                }
            }
            ErrorType::Generic => {
                if GENERIC_ERROR_DETAILS.contains(&detail) {
                    Ok(Self::Token(detail.to_string()))
                } else {
                    Err(invalid())
                }
            }
            ErrorType::Fallback => Ok(Self::Token(detail.to_string())),
        }
    }

    fn matches_code(&self, code: u32) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Code(c) => *c == code,
            Self::CodeRange { min, max } => (*min..=*max).contains(&code),
            Self::Token(_) => false,
        }
    }

    fn matches_token(&self, token: &str) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Token(t) => t == token,
            Self::Code(_) | Self::CodeRange { .. } => false,
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wildcard => f.write_str(WILDCARD),
            Self::Code(code) => write!(f, "{code}"),
            Self::CodeRange { min, max } => write!(f, "{min}-{max}"),
            Self::Token(token) => f.write_str(token),
        }
    }
}

fn parse_code(raw: &str) -> Option<u32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

/// An immutable, validated retry rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPolicy {
    pub(crate) error_type: ErrorType,
    pub(crate) error_details: Vec<ErrorDetail>,
    pub(crate) retry_array: RetryArray,
    pub(crate) unthrottling_events: BTreeSet<IwlanEvent>,
    pub(crate) num_attempts_per_fqdn: Option<u32>,
    pub(crate) handover_attempt_count: Option<u32>,
}

impl ErrorPolicy {
    pub const fn error_type(&self) -> ErrorType {
        self.error_type
    }

    pub fn error_details(&self) -> &[ErrorDetail] {
        &self.error_details
    }

    pub const fn retry_array(&self) -> &RetryArray {
        &self.retry_array
    }

    pub const fn unthrottling_events(&self) -> &BTreeSet<IwlanEvent> {
        &self.unthrottling_events
    }

    pub const fn num_attempts_per_fqdn(&self) -> Option<u32> {
        self.num_attempts_per_fqdn
    }

    /// Consecutive handover failures tolerated before falling back to an
    /// initial attach. Unset means never.
    pub fn handover_attempt_count(&self) -> u32 {
        self.handover_attempt_count.unwrap_or(u32::MAX)
    }

    /// Whether this rule matches `error`.
    pub fn matches(&self, error: &IwlanError) -> bool {
        match self.error_type {
            ErrorType::Fallback => true,
            ErrorType::IkeProtocol => error
                .ike_code()
                .is_some_and(|code| self.error_details.iter().any(|d| d.matches_code(code))),
            ErrorType::Generic => error.generic_detail().is_some_and(|token| {
                self.error_details.iter().any(|d| d.matches_token(token))
            }),
        }
    }

    /// A fallback rule either has the wildcard error type or a lone `"*"`
    /// detail.
    pub fn is_fallback(&self) -> bool {
        self.error_type == ErrorType::Fallback
            || matches!(self.error_details.as_slice(), [ErrorDetail::Wildcard])
    }

    /// Retry delay in seconds for the `index`-th consecutive failure.
    pub fn retry_time(&self, index: usize) -> Option<u64> {
        self.retry_array.retry_time(index)
    }

    /// Which gateway FQDN to try next, rotating every
    /// `NumAttemptsPerFqdn` attempts.
    ///
    /// `attempts` is the number of failures recorded so far.
    pub fn current_fqdn_index(&self, attempts: usize, num_fqdns: usize) -> Option<usize> {
        let per_fqdn = self.num_attempts_per_fqdn? as usize;
        if self.retry_array.is_empty() || num_fqdns == 0 {
            return None;
        }
        Some(attempts / per_fqdn % num_fqdns)
    }

    /// Whether the policy reacts to `event` by clearing throttles.
    pub fn can_unthrottle(&self, event: IwlanEvent) -> bool {
        self.unthrottling_events.contains(&event)
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let details: Vec<String> = self.error_details.iter().map(ToString::to_string).collect();
        write!(
            f,
            "{} details=[{}] retry={:?}{}",
            self.error_type,
            details.join(", "),
            self.retry_array.times(),
            if self.retry_array.repeats_last() {
                " (repeat last)"
            } else {
                ""
            }
        )?;
        if let Some(n) = self.num_attempts_per_fqdn {
            write!(f, " attempts_per_fqdn={n}")?;
        }
        if let Some(n) = self.handover_attempt_count {
            write!(f, " handover_attempts={n}")?;
        }
        Ok(())
    }
}
