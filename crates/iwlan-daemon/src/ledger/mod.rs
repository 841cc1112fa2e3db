//! Per-APN retry ledger.
//!
//! Records the last failure for each APN together with the policy it
//! resolved to, and answers throttle questions against that record:
//! whether a new bring-up may start, how long is left, which gateway FQDN
//! to try and whether a failed handover should fall back to initial attach.
//!
//! The ledger is owned by the dispatcher worker and never shared, so it
//! needs no locking.

pub mod stats;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use iwlan_core::config::StatsConfig;
use iwlan_core::policy::CarrierReload;
use iwlan_core::{
    Clock, DataFailCause, ErrorPolicy, ErrorType, IwlanError, IwlanEvent, PolicyResolver,
    PolicyStore,
};

use crate::listener::EventDiff;
use stats::{ErrorStats, ErrorStatsSnapshot};

/// Retry delay used once a policy has no more retry data.
pub const INDEFINITE_RETRY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
struct RetryEntry {
    error: IwlanError,
    policy: Arc<ErrorPolicy>,
    /// `None` until the first policy-driven report.
    retry_index: Option<usize>,
    last_error_at: Instant,
    /// Explicit backoff in seconds; set only for backoff-mode entries.
    backoff_secs: Option<u64>,
}

impl RetryEntry {
    const fn new(
        error: IwlanError,
        policy: Arc<ErrorPolicy>,
        now: Instant,
        backoff_secs: Option<u64>,
    ) -> Self {
        Self {
            error,
            policy,
            retry_index: None,
            last_error_at: now,
            backoff_secs,
        }
    }

    const fn in_backoff(&self) -> bool {
        self.backoff_secs.is_some()
    }

    /// Failures counted against the retry array so far.
    fn attempts(&self) -> usize {
        self.retry_index.map_or(0, |i| i + 1)
    }

    fn advance(&mut self, now: Instant) -> u64 {
        self.retry_index = Some(self.attempts());
        self.last_error_at = now;
        self.policy_retry_secs()
    }

    fn policy_retry_secs(&self) -> u64 {
        self.retry_index
            .and_then(|i| self.policy.retry_time(i))
            .unwrap_or(INDEFINITE_RETRY_SECS)
    }

    fn retry_secs(&self) -> u64 {
        self.backoff_secs
            .unwrap_or_else(|| self.policy_retry_secs())
    }

    fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_error_at)
    }

    fn remaining(&self, now: Instant) -> Duration {
        Duration::from_secs(self.retry_secs()).saturating_sub(self.elapsed(now))
    }
}

/// Outcome of a carrier configuration change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyUpdate {
    pub reload: CarrierReload,
    /// Unthrottling events to register and unregister.
    pub events: EventDiff,
}

/// One throttled APN in a dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThrottleSnapshot {
    pub apn: String,
    pub error: String,
    pub retry_index: Option<usize>,
    pub in_backoff: bool,
    pub remaining_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerDump {
    pub throttled: Vec<ThrottleSnapshot>,
    pub stats: ErrorStatsSnapshot,
}

/// Retry state for every APN of one slot.
#[derive(Debug)]
pub struct RetryLedger {
    store: PolicyStore,
    clock: Arc<dyn Clock>,
    entries: HashMap<String, RetryEntry>,
    most_recent: Option<(String, IwlanError)>,
    stats: ErrorStats,
    unthrottling_events: BTreeSet<IwlanEvent>,
}

impl RetryLedger {
    pub fn new(store: PolicyStore, clock: Arc<dyn Clock>, stats: &StatsConfig) -> Self {
        Self {
            store,
            clock,
            entries: HashMap::new(),
            most_recent: None,
            stats: ErrorStats::new(stats),
            unthrottling_events: BTreeSet::new(),
        }
    }

    pub const fn store(&self) -> &PolicyStore {
        &self.store
    }

    fn resolve(&self, apn: &str, error: &IwlanError) -> Arc<ErrorPolicy> {
        PolicyResolver::new(&self.store).resolve(apn, error)
    }

    /// Record a failure and return the retry delay in seconds.
    ///
    /// `NoError` clears the APN and returns `None`. A different error than
    /// the stored one restarts the schedule from the first retry value.
    pub fn report_error(&mut self, apn: &str, error: &IwlanError) -> Option<u64> {
        self.most_recent = Some((apn.to_string(), error.clone()));

        if error.is_no_error() {
            debug!(apn, "no error reported, clearing throttle");
            self.entries.remove(apn);
            return None;
        }
        self.stats.record(apn, error);

        if self
            .entries
            .get(apn)
            .is_some_and(|e| e.error == *error && e.in_backoff())
        {
            self.entries.remove(apn);
        }

        let now = self.clock.now();
        if self.entries.get(apn).is_none_or(|e| e.error != *error) {
            let policy = self.resolve(apn, error);
            debug!(apn, %error, policy = %policy, "new error for apn");
            self.entries
                .insert(apn.to_string(), RetryEntry::new(error.clone(), policy, now, None));
        }

        let entry = self.entries.get_mut(apn)?;
        let retry_secs = entry.advance(now);
        debug!(apn, %error, retry_index = ?entry.retry_index, retry_secs, "error reported");
        Some(retry_secs)
    }

    /// Record a failure that carries an explicit backoff from the network.
    ///
    /// Returns `backoff_secs`, or `None` for `NoError`.
    pub fn report_error_with_backoff(
        &mut self,
        apn: &str,
        error: &IwlanError,
        backoff_secs: u64,
    ) -> Option<u64> {
        if error.is_no_error() {
            debug!(apn, "no error reported, clearing throttle");
            self.entries.remove(apn);
            return None;
        }
        self.stats.record(apn, error);

        if self
            .entries
            .get(apn)
            .is_some_and(|e| e.error == *error && !e.in_backoff())
        {
            self.entries.remove(apn);
        }

        let now = self.clock.now();
        match self.entries.get_mut(apn) {
            Some(entry) if entry.error == *error => {
                entry.backoff_secs = Some(backoff_secs);
                entry.last_error_at = now;
            }
            _ => {
                let policy = self.resolve(apn, error);
                self.entries.insert(
                    apn.to_string(),
                    RetryEntry::new(error.clone(), policy, now, Some(backoff_secs)),
                );
            }
        }
        debug!(apn, %error, backoff_secs, "error reported with backoff");
        Some(backoff_secs)
    }

    /// Whether the throttle window for `apn` has passed.
    pub fn can_bring_up(&self, apn: &str) -> bool {
        self.entries.get(apn).is_none_or(|entry| {
            entry.elapsed(self.clock.now()) >= Duration::from_secs(entry.retry_secs())
        })
    }

    /// Time left before `apn` may retry; `None` when it is not throttled.
    pub fn current_retry_time(&self, apn: &str) -> Option<Duration> {
        self.entries
            .get(apn)
            .map(|entry| entry.remaining(self.clock.now()))
    }

    /// Gateway FQDN index for the most recently failing APN.
    pub fn current_fqdn_index(&self, num_fqdns: usize) -> Option<usize> {
        let (apn, _) = self.most_recent.as_ref()?;
        let entry = self.entries.get(apn)?;
        entry.policy.current_fqdn_index(entry.attempts(), num_fqdns)
    }

    /// Whether a failed handover on `apn` should be retried as an initial
    /// attach.
    pub fn should_retry_with_initial_attach(&self, apn: &str) -> bool {
        self.entries.get(apn).is_some_and(|entry| {
            entry.policy.error_type() == ErrorType::IkeProtocol
                && u64::try_from(entry.attempts()).unwrap_or(u64::MAX)
                    >= u64::from(entry.policy.handover_attempt_count())
        })
    }

    pub fn last_error(&self, apn: &str) -> IwlanError {
        self.entries
            .get(apn)
            .map_or(IwlanError::NO_ERROR, |entry| entry.error.clone())
    }

    pub fn data_fail_cause(&self, apn: &str) -> DataFailCause {
        self.entries
            .get(apn)
            .map_or(DataFailCause::None, |entry| DataFailCause::from_error(&entry.error))
    }

    pub fn most_recent_data_fail_cause(&self) -> DataFailCause {
        self.most_recent
            .as_ref()
            .map_or(DataFailCause::None, |(_, error)| DataFailCause::from_error(error))
    }

    /// Drop throttles that `event` lifts and return the freed APNs.
    ///
    /// `CarrierConfigChanged` drops every throttle without reporting APNs.
    pub fn unthrottle_on_event(&mut self, event: IwlanEvent) -> Vec<String> {
        if event == IwlanEvent::CarrierConfigChanged {
            debug!(cleared = self.entries.len(), "clearing all throttles");
            self.entries.clear();
            return Vec::new();
        }
        let mut freed: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.policy.can_unthrottle(event))
            .map(|(apn, _)| apn.clone())
            .collect();
        freed.sort();
        for apn in &freed {
            self.entries.remove(apn);
            info!(apn, %event, "apn unthrottled");
        }
        freed
    }

    /// Offer a new carrier policy document.
    pub fn on_carrier_config_changed(&mut self, carrier_id: i32, raw: Option<&str>) -> PolicyUpdate {
        let reload = self.store.reload_carrier_policies(carrier_id, raw);
        if !reload.was_considered() {
            debug!(carrier_id, "carrier config unchanged");
            return PolicyUpdate {
                reload,
                events: EventDiff::default(),
            };
        }
        self.unthrottle_on_event(IwlanEvent::CarrierConfigChanged);
        PolicyUpdate {
            reload,
            events: self.sync_unthrottling_events(),
        }
    }

    /// Recompute the unthrottling events every active policy needs and
    /// return how the registration must change.
    pub fn sync_unthrottling_events(&mut self) -> EventDiff {
        let wanted = self.store.unthrottling_events();
        let diff = EventDiff::between(&self.unthrottling_events, &wanted);
        self.unthrottling_events = wanted;
        debug!(events = ?self.unthrottling_events, "unthrottling events");
        diff
    }

    pub fn dump(&self) -> LedgerDump {
        let now = self.clock.now();
        let mut throttled: Vec<ThrottleSnapshot> = self
            .entries
            .iter()
            .map(|(apn, entry)| ThrottleSnapshot {
                apn: apn.clone(),
                error: entry.error.to_string(),
                retry_index: entry.retry_index,
                in_backoff: entry.in_backoff(),
                remaining_ms: u64::try_from(entry.remaining(now).as_millis()).unwrap_or(u64::MAX),
            })
            .collect();
        throttled.sort_by(|a, b| a.apn.cmp(&b.apn));
        LedgerDump {
            throttled,
            stats: self.stats.snapshot(),
        }
    }

    pub const fn stats(&self) -> &ErrorStats {
        &self.stats
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
#[path = "ledger_tests.rs"]
mod tests;
