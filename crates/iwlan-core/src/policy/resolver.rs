//! Policy lookup for an (APN, error) pair.

use std::sync::Arc;

use tracing::error;

use crate::iwlan_error::IwlanError;

use super::rule::{ErrorPolicy, ErrorType};
use super::store::{PolicyMap, PolicyStore};
use super::WILDCARD;

/// Resolves errors against a [`PolicyStore`].
#[derive(Debug, Clone, Copy)]
pub struct PolicyResolver<'a> {
    store: &'a PolicyStore,
}

impl<'a> PolicyResolver<'a> {
    pub const fn new(store: &'a PolicyStore) -> Self {
        Self { store }
    }

    /// Select the policy for `error` on `apn`.
    ///
    /// Layers are tried in order carrier\[apn\], carrier\["*"\],
    /// default\[apn\], default\["*"\]; the first that yields a match wins.
    pub fn resolve(&self, apn: &str, error: &IwlanError) -> Arc<ErrorPolicy> {
        let carrier = self.store.carrier();
        let defaults = self.store.defaults().policies();
        let layers: [(&PolicyMap, &str); 4] = [
            (carrier, apn),
            (carrier, WILDCARD),
            (defaults, apn),
            (defaults, WILDCARD),
        ];

        for (map, key) in layers {
            if let Some(policy) = map.get(key).and_then(|list| preferred_policy(list, error)) {
                return Arc::clone(policy);
            }
        }

        error!(apn, %error, "no error policy matched, using default fallback");
        Arc::clone(self.store.defaults().fallback())
    }
}

/// Pick the best match within one ordered list.
///
/// The first non-fallback match wins outright. Among fallback matches the
/// first is kept unless a later one has a non-generic error type.
pub fn preferred_policy<'p>(
    policies: &'p [Arc<ErrorPolicy>],
    error: &IwlanError,
) -> Option<&'p Arc<ErrorPolicy>> {
    let mut selected = None;
    for policy in policies.iter().filter(|p| p.matches(error)) {
        if !policy.is_fallback() {
            return Some(policy);
        }
        if selected.is_none() || policy.error_type() != ErrorType::Generic {
            selected = Some(policy);
        }
    }
    selected
}
