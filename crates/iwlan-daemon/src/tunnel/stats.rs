//! Tunnel setup and uptime statistics.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use iwlan_core::config::StatsConfig;

use super::state::TunnelPhase;

/// Running min/max/sum over durations, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DurationSummary {
    pub count: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub sum_ms: u64,
}

impl DurationSummary {
    pub fn record(&mut self, value: Duration) {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        self.min_ms = if self.count == 0 { ms } else { self.min_ms.min(ms) };
        self.max_ms = self.max_ms.max(ms);
        self.sum_ms = self.sum_ms.saturating_add(ms);
        self.count += 1;
    }

    pub fn mean_ms(&self) -> u64 {
        self.sum_ms.checked_div(self.count).unwrap_or(0)
    }
}

/// Per-APN counters kept by the orchestrator.
#[derive(Debug, Clone)]
pub struct TunnelStats {
    setup_success: BTreeMap<String, DurationSummary>,
    setup_failures: BTreeMap<String, u64>,
    unsolicited_downs: BTreeMap<String, u64>,
    up_time: BTreeMap<String, DurationSummary>,
    samples: usize,
    max_apns: usize,
    max_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelStatsSnapshot {
    pub setup_success: BTreeMap<String, DurationSummary>,
    pub setup_failures: BTreeMap<String, u64>,
    pub unsolicited_downs: BTreeMap<String, u64>,
    pub up_time: BTreeMap<String, DurationSummary>,
}

impl TunnelStats {
    pub const fn new(config: &StatsConfig) -> Self {
        Self {
            setup_success: BTreeMap::new(),
            setup_failures: BTreeMap::new(),
            unsolicited_downs: BTreeMap::new(),
            up_time: BTreeMap::new(),
            samples: 0,
            max_apns: config.max_apns,
            max_samples: config.max_samples,
        }
    }

    fn reset_if_full(&mut self) {
        let apns = self
            .setup_success
            .len()
            .max(self.setup_failures.len())
            .max(self.unsolicited_downs.len())
            .max(self.up_time.len());
        if self.samples >= self.max_samples || apns >= self.max_apns {
            self.reset();
        }
        self.samples += 1;
    }

    pub fn reset(&mut self) {
        self.setup_success.clear();
        self.setup_failures.clear();
        self.unsolicited_downs.clear();
        self.up_time.clear();
        self.samples = 0;
    }

    /// A tunnel for `apn` opened `latency` after its bring-up started.
    pub fn report_setup_success(&mut self, apn: &str, latency: Duration) {
        self.reset_if_full();
        self.setup_success
            .entry(apn.to_string())
            .or_default()
            .record(latency);
    }

    /// A tunnel for `apn` left `phase`. A bring-up that never opened counts
    /// as a setup failure; leaving `Up` without a deactivate is unsolicited.
    pub fn report_down(&mut self, apn: &str, phase: TunnelPhase, up_for: Option<Duration>) {
        self.reset_if_full();
        match phase {
            TunnelPhase::BringingUp => {
                *self.setup_failures.entry(apn.to_string()).or_insert(0) += 1;
                return;
            }
            TunnelPhase::Up => {
                *self.unsolicited_downs.entry(apn.to_string()).or_insert(0) += 1;
            }
            TunnelPhase::Down
            | TunnelPhase::BringingDown
            | TunnelPhase::ForceCleaningFromBringUp => {}
        }
        if let Some(up_for) = up_for {
            self.up_time.entry(apn.to_string()).or_default().record(up_for);
        }
    }

    pub fn snapshot(&self) -> TunnelStatsSnapshot {
        TunnelStatsSnapshot {
            setup_success: self.setup_success.clone(),
            setup_failures: self.setup_failures.clone(),
            unsolicited_downs: self.unsolicited_downs.clone(),
            up_time: self.up_time.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn summary_tracks_min_max_mean() {
        let mut s = DurationSummary::default();
        assert_eq!(s.mean_ms(), 0);
        s.record(Duration::from_millis(300));
        s.record(Duration::from_millis(100));
        s.record(Duration::from_millis(200));
        assert_eq!((s.count, s.min_ms, s.max_ms, s.mean_ms()), (3, 100, 300, 200));
    }

    #[test]
    fn counts_per_apn() {
        let mut stats = TunnelStats::new(&StatsConfig::default());
        stats.report_setup_success("ims", Duration::from_millis(40));
        stats.report_down("ims", TunnelPhase::BringingUp, None);
        stats.report_down("ims", TunnelPhase::BringingUp, None);
        stats.report_down("ims", TunnelPhase::Up, Some(Duration::from_secs(60)));
        stats.report_down("mms", TunnelPhase::BringingDown, Some(Duration::from_secs(5)));

        let snap = stats.snapshot();
        assert_eq!(snap.setup_success["ims"].count, 1);
        assert_eq!(snap.setup_failures["ims"], 2);
        assert_eq!(snap.unsolicited_downs["ims"], 1);
        assert!(!snap.unsolicited_downs.contains_key("mms"));
        assert_eq!(snap.up_time["ims"].max_ms, 60_000);
        assert_eq!(snap.up_time["mms"].count, 1);
    }

    #[test]
    fn force_cleaned_bring_up_is_not_a_setup_failure() {
        let mut stats = TunnelStats::new(&StatsConfig::default());
        stats.report_down("ims", TunnelPhase::ForceCleaningFromBringUp, None);
        let snap = stats.snapshot();
        assert!(snap.setup_failures.is_empty());
        assert!(snap.up_time.is_empty());
    }

    #[test]
    fn resets_once_apn_bound_is_reached() {
        let mut stats = TunnelStats::new(&StatsConfig {
            max_apns: 2,
            max_samples: 1000,
        });
        stats.report_down("a", TunnelPhase::BringingUp, None);
        stats.report_down("b", TunnelPhase::BringingUp, None);
        stats.report_down("c", TunnelPhase::BringingUp, None);
        let snap = stats.snapshot();
        assert_eq!(snap.setup_failures.len(), 1);
        assert_eq!(snap.setup_failures["c"], 1);
    }

    #[test]
    fn resets_once_sample_bound_is_reached() {
        let mut stats = TunnelStats::new(&StatsConfig {
            max_apns: 10,
            max_samples: 3,
        });
        for _ in 0..3 {
            stats.report_down("ims", TunnelPhase::BringingUp, None);
        }
        assert_eq!(stats.snapshot().setup_failures["ims"], 3);
        stats.report_down("ims", TunnelPhase::BringingUp, None);
        assert_eq!(stats.snapshot().setup_failures["ims"], 1);
    }
}
