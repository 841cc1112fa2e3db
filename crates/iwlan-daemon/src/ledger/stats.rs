//! Bounded per-APN error counters.

use std::collections::BTreeMap;

use serde::Serialize;

use iwlan_core::IwlanError;
use iwlan_core::config::StatsConfig;

/// Error occurrence counts keyed by APN, then by error name.
///
/// Wiped when either bound is reached so memory stays flat.
#[derive(Debug, Clone)]
pub struct ErrorStats {
    counts: BTreeMap<String, BTreeMap<String, u64>>,
    samples: usize,
    max_apns: usize,
    max_samples: usize,
}

/// Serializable view of [`ErrorStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorStatsSnapshot {
    pub samples: usize,
    pub counts: BTreeMap<String, BTreeMap<String, u64>>,
}

impl ErrorStats {
    pub const fn new(config: &StatsConfig) -> Self {
        Self {
            counts: BTreeMap::new(),
            samples: 0,
            max_apns: config.max_apns,
            max_samples: config.max_samples,
        }
    }

    pub fn record(&mut self, apn: &str, error: &IwlanError) {
        if self.counts.len() >= self.max_apns || self.samples >= self.max_samples {
            self.reset();
        }
        *self
            .counts
            .entry(apn.to_string())
            .or_default()
            .entry(error.to_string())
            .or_insert(0) += 1;
        self.samples += 1;
    }

    pub fn count(&self, apn: &str, error: &IwlanError) -> u64 {
        self.counts
            .get(apn)
            .and_then(|errors| errors.get(&error.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.counts.clear();
        self.samples = 0;
    }

    pub fn snapshot(&self) -> ErrorStatsSnapshot {
        ErrorStatsSnapshot {
            samples: self.samples,
            counts: self.counts.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use iwlan_core::iwlan_error::ErrorKind;

    fn stats(max_apns: usize, max_samples: usize) -> ErrorStats {
        ErrorStats::new(&StatsConfig {
            max_apns,
            max_samples,
        })
    }

    #[test]
    fn counts_by_apn_and_error_name() {
        let mut stats = stats(10, 1000);
        let io = IwlanError::new(ErrorKind::IkeIoError);
        stats.record("ims", &io);
        stats.record("ims", &io);
        stats.record("ims", &IwlanError::ike_protocol(24));
        stats.record("mms", &io);

        assert_eq!(stats.count("ims", &io), 2);
        assert_eq!(stats.count("ims", &IwlanError::ike_protocol(24)), 1);
        assert_eq!(stats.count("ims", &IwlanError::ike_protocol(36)), 0);
        assert_eq!(stats.count("mms", &io), 1);
        assert_eq!(stats.snapshot().samples, 4);
    }

    #[test]
    fn resets_when_apn_bound_reached() {
        let mut stats = stats(2, 1000);
        let err = IwlanError::ike_protocol(24);
        stats.record("a", &err);
        stats.record("b", &err);
        stats.record("c", &err);
        assert_eq!(stats.count("a", &err), 0);
        assert_eq!(stats.count("c", &err), 1);
        assert_eq!(stats.snapshot().samples, 1);
    }

    #[test]
    fn resets_when_sample_bound_reached() {
        let mut stats = stats(10, 3);
        let err = IwlanError::ike_protocol(24);
        for _ in 0..3 {
            stats.record("ims", &err);
        }
        assert_eq!(stats.count("ims", &err), 3);
        stats.record("ims", &err);
        assert_eq!(stats.count("ims", &err), 1);
    }
}
