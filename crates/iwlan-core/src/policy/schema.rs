//! Wire format of error policy documents.
//!
//! ```json
//! [{"ApnName": "ims",
//!   "ErrorTypes": [{"ErrorType": "IKE_PROTOCOL_ERROR_TYPE",
//!                   "ErrorDetails": ["24", "9000-9050"],
//!                   "RetryArray": ["4", "8", "16"],
//!                   "UnthrottlingEvents": ["APM_ENABLE_EVENT"],
//!                   "NumAttemptsPerFqdn": "2",
//!                   "HandoverAttemptCount": "3"}]}]
//! ```
//!
//! Lines whose first character is `#` are comments and are dropped before
//! the document is deserialized.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::event::IwlanEvent;

use super::retry::RetryArray;
use super::rule::{ErrorDetail, ErrorPolicy, ErrorType};
use super::store::PolicyMap;
use super::PolicyError;

/// Policies for one APN as written in the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApnPolicies {
    pub apn_name: String,
    pub error_types: Vec<RawErrorPolicy>,
}

/// One rule as written in the document, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawErrorPolicy {
    pub error_type: String,
    pub error_details: Vec<String>,
    pub retry_array: Vec<String>,
    pub unthrottling_events: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_attempts_per_fqdn: Option<Count>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handover_attempt_count: Option<Count>,
}

/// Integer field that carrier configs write either as a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Count {
    Number(i64),
    Text(String),
}

impl Count {
    fn positive(&self, field: &'static str) -> Result<u32, PolicyError> {
        let invalid = || PolicyError::InvalidCount {
            field,
            value: match self {
                Self::Number(n) => n.to_string(),
                Self::Text(s) => s.clone(),
            },
        };
        let value = match self {
            Self::Number(n) => u32::try_from(*n).map_err(|_| invalid())?,
            Self::Text(s) => s.trim().parse::<u32>().map_err(|_| invalid())?,
        };
        if value == 0 {
            return Err(invalid());
        }
        Ok(value)
    }
}

impl RawErrorPolicy {
    /// Validate into an immutable policy.
    pub fn validate(&self) -> Result<ErrorPolicy, PolicyError> {
        let error_type = ErrorType::parse(&self.error_type)?;
        let error_details = self
            .error_details
            .iter()
            .map(|d| ErrorDetail::parse(error_type, d))
            .collect::<Result<Vec<_>, _>>()?;
        let retry_array = RetryArray::parse(&self.retry_array)?;
        let unthrottling_events = self
            .unthrottling_events
            .iter()
            .map(|name| {
                let event: IwlanEvent = name.parse()?;
                if event.can_unthrottle() {
                    Ok(event)
                } else {
                    Err(PolicyError::UnknownUnthrottlingEvent(name.trim().to_string()))
                }
            })
            .collect::<Result<BTreeSet<_>, PolicyError>>()?;
        let num_attempts_per_fqdn = self
            .num_attempts_per_fqdn
            .as_ref()
            .map(|c| c.positive("NumAttemptsPerFqdn"))
            .transpose()?;
        let handover_attempt_count = match &self.handover_attempt_count {
            Some(_) if error_type != ErrorType::IkeProtocol => {
                return Err(PolicyError::HandoverAttemptCountNotAllowed(error_type));
            }
            Some(c) => Some(c.positive("HandoverAttemptCount")?),
            None => None,
        };

        Ok(ErrorPolicy {
            error_type,
            error_details,
            retry_array,
            unthrottling_events,
            num_attempts_per_fqdn,
            handover_attempt_count,
        })
    }
}

/// Drop `#` comment lines.
pub fn strip_comments(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse and validate a whole policy document.
///
/// Rules keep document order per APN; repeated APN entries append.
pub fn parse_document(raw: &str) -> Result<PolicyMap, PolicyError> {
    let entries: Vec<ApnPolicies> = serde_json::from_str(&strip_comments(raw))?;
    let mut map: PolicyMap = HashMap::new();
    for entry in entries {
        let policies = map.entry(entry.apn_name.trim().to_string()).or_default();
        for raw_policy in &entry.error_types {
            policies.push(Arc::new(raw_policy.validate()?));
        }
    }
    Ok(map)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn doc(policy: &str) -> String {
        format!(r#"[{{"ApnName": "ims", "ErrorTypes": [{policy}]}}]"#)
    }

    #[test]
    fn parses_full_rule() {
        let map = parse_document(&doc(
            r#"{"ErrorType": "IKE_PROTOCOL_ERROR_TYPE",
                "ErrorDetails": ["24", "34", "9000-9050"],
                "RetryArray": ["4", "8", "16"],
                "UnthrottlingEvents": ["APM_ENABLE_EVENT", "WIFI_AP_CHANGED_EVENT"],
                "NumAttemptsPerFqdn": "6",
                "HandoverAttemptCount": 2}"#,
        ))
        .unwrap();
        let policy = &map["ims"][0];
        assert_eq!(policy.error_type(), ErrorType::IkeProtocol);
        assert_eq!(policy.error_details().len(), 3);
        assert_eq!(policy.retry_time(2), Some(16));
        assert_eq!(policy.num_attempts_per_fqdn(), Some(6));
        assert_eq!(policy.handover_attempt_count(), 2);
        assert!(policy.can_unthrottle(IwlanEvent::WifiApChanged));
    }

    #[test]
    fn comment_lines_are_ignored() {
        let raw = format!(
            "# bundled defaults\n#   second comment\n{}",
            doc(r#"{"ErrorType": "*", "ErrorDetails": ["*"], "RetryArray": ["1"], "UnthrottlingEvents": []}"#)
        );
        assert_eq!(parse_document(&raw).unwrap()["ims"].len(), 1);
    }

    #[test]
    fn handover_count_requires_ike_type() {
        let err = parse_document(&doc(
            r#"{"ErrorType": "GENERIC_ERROR_TYPE", "ErrorDetails": ["IO_EXCEPTION"],
                "RetryArray": ["1"], "UnthrottlingEvents": [], "HandoverAttemptCount": "2"}"#,
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            PolicyError::HandoverAttemptCountNotAllowed(ErrorType::Generic)
        ));
    }

    #[test]
    fn rejects_unknown_error_type_and_event() {
        assert!(matches!(
            parse_document(&doc(
                r#"{"ErrorType": "BOGUS", "ErrorDetails": ["*"], "RetryArray": [], "UnthrottlingEvents": []}"#
            )),
            Err(PolicyError::UnknownErrorType(_))
        ));
        assert!(matches!(
            parse_document(&doc(
                r#"{"ErrorType": "*", "ErrorDetails": ["*"], "RetryArray": [], "UnthrottlingEvents": ["CALL_STATE_CHANGED_EVENT"]}"#
            )),
            Err(PolicyError::UnknownUnthrottlingEvent(_))
        ));
    }

    #[test]
    fn rejects_missing_fields_and_bad_json() {
        assert!(matches!(
            parse_document(&doc(r#"{"ErrorType": "*", "ErrorDetails": ["*"]}"#)),
            Err(PolicyError::Malformed(_))
        ));
        assert!(matches!(
            parse_document("not json"),
            Err(PolicyError::Malformed(_))
        ));
    }

    #[test]
    fn zero_attempts_per_fqdn_is_rejected() {
        assert!(matches!(
            parse_document(&doc(
                r#"{"ErrorType": "*", "ErrorDetails": ["*"], "RetryArray": ["1"],
                    "UnthrottlingEvents": [], "NumAttemptsPerFqdn": 0}"#
            )),
            Err(PolicyError::InvalidCount { .. })
        ));
    }

    #[test]
    fn repeated_apn_entries_append_in_order() {
        let raw = r#"[
            {"ApnName": "ims", "ErrorTypes": [{"ErrorType": "IKE_PROTOCOL_ERROR_TYPE", "ErrorDetails": ["24"], "RetryArray": ["1"], "UnthrottlingEvents": []}]},
            {"ApnName": " ims ", "ErrorTypes": [{"ErrorType": "*", "ErrorDetails": ["*"], "RetryArray": ["2"], "UnthrottlingEvents": []}]}
        ]"#;
        let map = parse_document(raw).unwrap();
        assert_eq!(map["ims"].len(), 2);
        assert_eq!(map["ims"][1].error_type(), ErrorType::Fallback);
    }
}
