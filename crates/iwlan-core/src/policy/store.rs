//! Layered storage of default and carrier policies.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::event::IwlanEvent;

use super::rule::{ErrorPolicy, ErrorType};
use super::schema::parse_document;
use super::{PolicyError, WILDCARD};

/// APN name (or `"*"`) to its ordered rules.
pub type PolicyMap = HashMap<String, Vec<Arc<ErrorPolicy>>>;

const BUNDLED_DEFAULTS: &str = include_str!("../../assets/default_error_policies.json");

/// Validated default policies.
///
/// Construction fails unless the `"*"` APN carries a rule of error type
/// `"*"`, so resolution against the defaults can never come up empty.
#[derive(Debug, Clone)]
pub struct DefaultPolicies {
    policies: PolicyMap,
    fallback: Arc<ErrorPolicy>,
}

impl DefaultPolicies {
    pub fn parse(raw: &str) -> Result<Self, PolicyError> {
        let policies = parse_document(raw)?;
        let fallback = policies
            .get(WILDCARD)
            .and_then(|list| {
                list.iter()
                    .find(|p| p.error_type() == ErrorType::Fallback)
                    .cloned()
            })
            .ok_or(PolicyError::MissingDefaultFallback)?;
        Ok(Self { policies, fallback })
    }

    /// Defaults compiled into the binary.
    pub fn bundled() -> Result<Self, PolicyError> {
        Self::parse(BUNDLED_DEFAULTS)
    }

    /// Defaults from a file on disk, replacing the bundled document.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::parse(&raw)?)
    }

    pub const fn policies(&self) -> &PolicyMap {
        &self.policies
    }

    /// The wildcard rule of the `"*"` APN.
    pub const fn fallback(&self) -> &Arc<ErrorPolicy> {
        &self.fallback
    }
}

/// Outcome of offering a carrier policy document to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierReload {
    /// Same carrier and same document as the active one.
    Unchanged,
    /// No document supplied; current carrier policies kept.
    Missing,
    /// Document parsed to zero APN entries; ignored.
    Empty,
    /// Document parsed and replaced the carrier policies.
    Applied,
    /// Document failed to parse; carrier policies cleared.
    Rejected,
}

impl CarrierReload {
    /// Whether the store considered the document at all.
    pub const fn was_considered(self) -> bool {
        !matches!(self, Self::Unchanged)
    }

    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Defaults shared across slots plus one slot's carrier overrides.
#[derive(Debug, Clone)]
pub struct PolicyStore {
    defaults: Arc<DefaultPolicies>,
    carrier: PolicyMap,
    carrier_config: Option<String>,
    carrier_id: Option<i32>,
}

impl PolicyStore {
    pub fn with_defaults(defaults: Arc<DefaultPolicies>) -> Self {
        Self {
            defaults,
            carrier: PolicyMap::new(),
            carrier_config: None,
            carrier_id: None,
        }
    }

    /// Store over the bundled defaults.
    pub fn load_defaults() -> Result<Self, PolicyError> {
        Ok(Self::with_defaults(Arc::new(DefaultPolicies::bundled()?)))
    }

    pub fn defaults(&self) -> &DefaultPolicies {
        &self.defaults
    }

    pub const fn carrier(&self) -> &PolicyMap {
        &self.carrier
    }

    pub fn carrier_config(&self) -> Option<&str> {
        self.carrier_config.as_deref()
    }

    pub const fn carrier_id(&self) -> Option<i32> {
        self.carrier_id
    }

    /// A reload is due when the carrier changed, nothing is stored yet, or
    /// the offered document differs from the stored one.
    pub fn needs_reload(&self, carrier_id: i32, raw: Option<&str>) -> bool {
        self.carrier_id != Some(carrier_id)
            || self.carrier_config.is_none()
            || raw.is_some_and(|raw| self.carrier_config.as_deref() != Some(raw))
    }

    /// Offer a new carrier document.
    ///
    /// Never fails: a bad document is logged and drops the carrier layer.
    pub fn reload_carrier_policies(&mut self, carrier_id: i32, raw: Option<&str>) -> CarrierReload {
        if !self.needs_reload(carrier_id, raw) {
            return CarrierReload::Unchanged;
        }
        let Some(raw) = raw else {
            info!(carrier_id, "carrier error policy not found, keeping current policies");
            return CarrierReload::Missing;
        };
        match parse_document(raw) {
            Ok(policies) if policies.is_empty() => {
                debug!(carrier_id, "carrier error policy is empty, ignoring");
                CarrierReload::Empty
            }
            Ok(policies) => {
                info!(carrier_id, apns = policies.len(), "carrier error policies updated");
                self.carrier = policies;
                self.carrier_config = Some(raw.to_string());
                self.carrier_id = Some(carrier_id);
                CarrierReload::Applied
            }
            Err(e) => {
                warn!(carrier_id, error = %e, "unable to parse carrier error policy");
                self.carrier.clear();
                self.carrier_config = None;
                CarrierReload::Rejected
            }
        }
    }

    /// Events some active policy can be unthrottled by, plus
    /// `CarrierConfigChanged`.
    pub fn unthrottling_events(&self) -> BTreeSet<IwlanEvent> {
        let mut events: BTreeSet<IwlanEvent> = self
            .carrier
            .values()
            .chain(self.defaults.policies.values())
            .flatten()
            .flat_map(|p| p.unthrottling_events().iter().copied())
            .collect();
        events.insert(IwlanEvent::CarrierConfigChanged);
        events
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    const CARRIER: &str = r#"[{"ApnName": "ims", "ErrorTypes": [
        {"ErrorType": "IKE_PROTOCOL_ERROR_TYPE", "ErrorDetails": ["24"],
         "RetryArray": ["4", "8", "16"], "UnthrottlingEvents": ["WIFI_CALLING_DISABLE_EVENT"]}]}]"#;

    #[test]
    fn bundled_defaults_have_a_fallback() {
        let defaults = DefaultPolicies::bundled().unwrap();
        assert_eq!(defaults.fallback().error_type(), ErrorType::Fallback);
        assert_eq!(defaults.fallback().retry_time(0), Some(5));
        assert!(defaults.fallback().retry_array().repeats_last());
    }

    #[test]
    fn defaults_without_wildcard_fallback_are_rejected() {
        let raw = r#"[{"ApnName": "ims", "ErrorTypes": [
            {"ErrorType": "*", "ErrorDetails": ["*"], "RetryArray": ["1"], "UnthrottlingEvents": []}]}]"#;
        assert!(matches!(
            DefaultPolicies::parse(raw),
            Err(PolicyError::MissingDefaultFallback)
        ));

        let raw = r#"[{"ApnName": "*", "ErrorTypes": [
            {"ErrorType": "IKE_PROTOCOL_ERROR_TYPE", "ErrorDetails": ["*"], "RetryArray": ["1"], "UnthrottlingEvents": []}]}]"#;
        assert!(matches!(
            DefaultPolicies::parse(raw),
            Err(PolicyError::MissingDefaultFallback)
        ));
    }

    #[test]
    fn defaults_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("defaults.json");
        std::fs::write(&path, BUNDLED_DEFAULTS).unwrap();
        assert!(DefaultPolicies::load(&path).is_ok());
        assert!(DefaultPolicies::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn carrier_reload_lifecycle() {
        let mut store = PolicyStore::load_defaults().unwrap();
        assert!(store.needs_reload(1, None));

        assert_eq!(store.reload_carrier_policies(1, Some(CARRIER)), CarrierReload::Applied);
        assert_eq!(store.carrier()["ims"].len(), 1);
        assert_eq!(store.carrier_id(), Some(1));

        assert!(!store.needs_reload(1, Some(CARRIER)));
        assert!(!store.needs_reload(1, None));
        assert_eq!(
            store.reload_carrier_policies(1, Some(CARRIER)),
            CarrierReload::Unchanged
        );

        assert_eq!(store.reload_carrier_policies(2, None), CarrierReload::Missing);
        assert_eq!(store.carrier()["ims"].len(), 1);

        assert_eq!(store.reload_carrier_policies(2, Some("[]")), CarrierReload::Empty);
        assert_eq!(store.carrier()["ims"].len(), 1);

        assert_eq!(
            store.reload_carrier_policies(2, Some("{broken")),
            CarrierReload::Rejected
        );
        assert!(store.carrier().is_empty());
        assert_eq!(store.carrier_config(), None);
    }

    #[test]
    fn unthrottling_events_cover_both_layers() {
        let mut store = PolicyStore::load_defaults().unwrap();
        let before = store.unthrottling_events();
        assert!(before.contains(&IwlanEvent::CarrierConfigChanged));
        assert!(before.contains(&IwlanEvent::ApmEnable));
        assert!(!before.contains(&IwlanEvent::WifiCallingDisable));

        store.reload_carrier_policies(1, Some(CARRIER));
        assert!(store
            .unthrottling_events()
            .contains(&IwlanEvent::WifiCallingDisable));
    }
}
