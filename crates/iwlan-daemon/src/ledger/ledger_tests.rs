use super::*;
use iwlan_core::clock::ManualClock;
use iwlan_core::iwlan_error::ErrorKind;

const CARRIER: &str = r#"[
  {"ApnName": "ims", "ErrorTypes": [
    {"ErrorType": "IKE_PROTOCOL_ERROR_TYPE", "ErrorDetails": ["24"],
     "RetryArray": ["4", "8", "16"], "UnthrottlingEvents": ["WIFI_CALLING_DISABLE_EVENT"]},
    {"ErrorType": "IKE_PROTOCOL_ERROR_TYPE", "ErrorDetails": ["9000-9050"],
     "RetryArray": ["10", "15", "20"], "UnthrottlingEvents": ["APM_ENABLE_EVENT"],
     "HandoverAttemptCount": "2"},
    {"ErrorType": "GENERIC_ERROR_TYPE", "ErrorDetails": ["SERVER_SELECTION_FAILED"],
     "RetryArray": ["0", "0", "300", "600", "1200", "0", "0", "0", "300", "600", "1200", "-1"],
     "UnthrottlingEvents": ["APM_ENABLE_EVENT"], "NumAttemptsPerFqdn": "6"}
  ]}
]"#;

fn ledger() -> (RetryLedger, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let store = PolicyStore::load_defaults().unwrap();
    let mut ledger = RetryLedger::new(store, clock.clone(), &StatsConfig::default());
    ledger.on_carrier_config_changed(1, Some(CARRIER));
    (ledger, clock)
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[test]
fn schedule_walks_the_retry_array_then_waits_a_day() {
    let (mut ledger, _clock) = ledger();
    let err = IwlanError::ike_protocol(24);

    assert_eq!(ledger.report_error("ims", &err), Some(4));
    assert_eq!(ledger.report_error("ims", &err), Some(8));
    assert_eq!(ledger.report_error("ims", &err), Some(16));
    assert_eq!(ledger.report_error("ims", &err), Some(INDEFINITE_RETRY_SECS));
    assert_eq!(ledger.last_error("ims"), err);
}

#[test]
fn throttle_window_elapses_with_the_clock() {
    let (mut ledger, clock) = ledger();
    let err = IwlanError::ike_protocol(24);

    assert!(ledger.can_bring_up("ims"));
    assert_eq!(ledger.current_retry_time("ims"), None);

    ledger.report_error("ims", &err);
    assert!(!ledger.can_bring_up("ims"));
    assert_eq!(ledger.current_retry_time("ims"), Some(secs(4)));

    clock.advance(secs(3));
    assert!(!ledger.can_bring_up("ims"));
    assert_eq!(ledger.current_retry_time("ims"), Some(secs(1)));

    clock.advance(secs(1));
    assert!(ledger.can_bring_up("ims"));
    assert_eq!(ledger.current_retry_time("ims"), Some(Duration::ZERO));
}

#[test]
fn no_error_clears_the_apn() {
    let (mut ledger, _clock) = ledger();
    ledger.report_error("ims", &IwlanError::ike_protocol(24));
    assert!(!ledger.data_fail_cause("ims").is_none());

    assert_eq!(ledger.report_error("ims", &IwlanError::NO_ERROR), None);
    assert!(ledger.can_bring_up("ims"));
    assert_eq!(ledger.last_error("ims"), IwlanError::NO_ERROR);
    assert_eq!(ledger.data_fail_cause("ims"), DataFailCause::None);
    assert_eq!(ledger.most_recent_data_fail_cause(), DataFailCause::None);
}

#[test]
fn different_error_restarts_the_schedule() {
    let (mut ledger, _clock) = ledger();
    ledger.report_error("ims", &IwlanError::ike_protocol(24));
    ledger.report_error("ims", &IwlanError::ike_protocol(24));

    assert_eq!(ledger.report_error("ims", &IwlanError::ike_protocol(9002)), Some(10));
    assert_eq!(ledger.report_error("ims", &IwlanError::ike_protocol(24)), Some(4));
}

#[test]
fn unknown_apn_uses_wildcard_defaults() {
    let (mut ledger, _clock) = ledger();
    let io = IwlanError::new(ErrorKind::IkeIoError);
    let retries: Vec<_> = (0..4).map(|_| ledger.report_error("mms", &io)).collect();
    assert_eq!(retries, vec![Some(0), Some(0), Some(0), Some(30)]);

    let generic = IwlanError::new(ErrorKind::SimNotReady);
    assert_eq!(ledger.report_error("internet", &generic), Some(5));
}

#[test]
fn backoff_overrides_the_policy_schedule() {
    let (mut ledger, clock) = ledger();
    let err = IwlanError::ike_protocol(9002);

    assert_eq!(ledger.report_error_with_backoff("ims", &err, 100), Some(100));
    assert_eq!(ledger.current_retry_time("ims"), Some(secs(100)));

    clock.advance(secs(50));
    assert_eq!(ledger.report_error_with_backoff("ims", &err, 30), Some(30));
    assert_eq!(ledger.current_retry_time("ims"), Some(secs(30)));
    assert!(!ledger.can_bring_up("ims"));

    clock.advance(secs(30));
    assert!(ledger.can_bring_up("ims"));

    // Leaving backoff restarts the policy schedule from the top.
    assert_eq!(ledger.report_error("ims", &err), Some(10));
    assert_eq!(ledger.report_error("ims", &err), Some(15));

    // Entering backoff drops the policy progress.
    assert_eq!(ledger.report_error_with_backoff("ims", &err, 5), Some(5));
    assert_eq!(ledger.report_error("ims", &err), Some(10));
}

#[test]
fn backoff_with_no_error_clears() {
    let (mut ledger, _clock) = ledger();
    ledger.report_error_with_backoff("ims", &IwlanError::ike_protocol(24), 60);
    assert_eq!(
        ledger.report_error_with_backoff("ims", &IwlanError::NO_ERROR, 60),
        None
    );
    assert!(ledger.can_bring_up("ims"));
}

#[test]
fn fqdn_index_rotates_every_n_attempts() {
    let (mut ledger, _clock) = ledger();
    let err = IwlanError::new(ErrorKind::ServerSelectionFailed);
    assert_eq!(ledger.current_fqdn_index(2), None);

    for _ in 0..5 {
        ledger.report_error("ims", &err);
        assert_eq!(ledger.current_fqdn_index(2), Some(0));
    }
    for _ in 5..11 {
        ledger.report_error("ims", &err);
        assert_eq!(ledger.current_fqdn_index(2), Some(1));
    }
    ledger.report_error("ims", &err);
    assert_eq!(ledger.current_fqdn_index(2), Some(0));
}

#[test]
fn fqdn_index_needs_a_rotating_policy() {
    let (mut ledger, _clock) = ledger();
    ledger.report_error("ims", &IwlanError::ike_protocol(24));
    assert_eq!(ledger.current_fqdn_index(2), None);
}

#[test]
fn initial_attach_after_handover_attempt_count() {
    let (mut ledger, _clock) = ledger();
    let err = IwlanError::ike_protocol(9010);

    assert!(!ledger.should_retry_with_initial_attach("ims"));
    ledger.report_error("ims", &err);
    assert!(!ledger.should_retry_with_initial_attach("ims"));
    ledger.report_error("ims", &err);
    assert!(ledger.should_retry_with_initial_attach("ims"));

    // Without a HandoverAttemptCount the count is never reached.
    for _ in 0..10 {
        ledger.report_error("ims", &IwlanError::ike_protocol(24));
    }
    assert!(!ledger.should_retry_with_initial_attach("ims"));
}

#[test]
fn unthrottle_event_frees_matching_apns() {
    let (mut ledger, _clock) = ledger();
    ledger.report_error("ims", &IwlanError::ike_protocol(24));
    ledger.report_error("mms", &IwlanError::new(ErrorKind::IkeIoError));

    assert!(ledger.unthrottle_on_event(IwlanEvent::CallStateChanged).is_empty());

    assert_eq!(
        ledger.unthrottle_on_event(IwlanEvent::WifiCallingDisable),
        vec!["ims".to_string()]
    );
    assert!(ledger.can_bring_up("ims"));
    assert!(!ledger.can_bring_up("mms"));

    assert_eq!(
        ledger.unthrottle_on_event(IwlanEvent::WifiApChanged),
        vec!["mms".to_string()]
    );
    assert!(ledger.can_bring_up("mms"));
}

#[test]
fn carrier_config_change_clears_everything_and_updates_events() {
    let clock = Arc::new(ManualClock::new());
    let mut ledger = RetryLedger::new(
        PolicyStore::load_defaults().unwrap(),
        clock,
        &StatsConfig::default(),
    );
    let initial = ledger.sync_unthrottling_events();
    assert!(initial.register.contains(&IwlanEvent::CarrierConfigChanged));
    assert!(!initial.register.contains(&IwlanEvent::WifiCallingDisable));

    ledger.report_error("ims", &IwlanError::ike_protocol(24));
    let update = ledger.on_carrier_config_changed(7, Some(CARRIER));
    assert_eq!(update.reload, CarrierReload::Applied);
    assert_eq!(update.events.register, [IwlanEvent::WifiCallingDisable].into());
    assert!(update.events.unregister.is_empty());
    assert!(ledger.can_bring_up("ims"));
    assert_eq!(ledger.store().carrier_id(), Some(7));

    ledger.report_error("ims", &IwlanError::ike_protocol(24));
    let again = ledger.on_carrier_config_changed(7, Some(CARRIER));
    assert_eq!(again.reload, CarrierReload::Unchanged);
    assert!(again.events.is_empty());
    assert!(!ledger.can_bring_up("ims"));
}

#[test]
fn dump_lists_throttled_apns_and_counts() {
    let (mut ledger, clock) = ledger();
    let err = IwlanError::ike_protocol(24);
    ledger.report_error("ims", &err);
    ledger.report_error("ims", &err);
    clock.advance(secs(2));

    let dump = ledger.dump();
    assert_eq!(dump.throttled.len(), 1);
    let ims = &dump.throttled[0];
    assert_eq!(ims.apn, "ims");
    assert_eq!(ims.retry_index, Some(1));
    assert!(!ims.in_backoff);
    assert_eq!(ims.remaining_ms, 6000);
    assert_eq!(dump.stats.samples, 2);
    assert_eq!(ledger.stats().count("ims", &err), 2);

    let json = serde_json::to_value(&dump).unwrap();
    assert_eq!(json["throttled"][0]["error"], "IKE_PROTOCOL_EXCEPTION(24)");
}
