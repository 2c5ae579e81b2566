//! Connection manager: probing, ranking, failure reporting and attempt sharing.

mod common;

use common::{MockTransport, manager};
use hub_client::{ClientError, ConnectionManager, ConnectionStatus, ManagerConfig, ProbeFailure, RelayHealth};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_partial_connectivity_is_success() {
    let transport = MockTransport::new().reachable("wss://up.example", Duration::from_millis(40));
    let manager = manager(
        &[
            "wss://down-1.example",
            "wss://down-2.example",
            "wss://up.example",
            "wss://down-3.example",
            "wss://down-4.example",
        ],
        transport.clone(),
    );

    let handle = manager.ensure_connection().await.unwrap();

    assert_eq!(handle.relays(), ["wss://up.example".to_string()]);
    assert_eq!(transport.probe_count(), 5);

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    assert_eq!(snapshot.connected_relays, vec!["wss://up.example".to_string()]);
    assert_eq!(snapshot.relay_health.get("wss://up.example"), Some(&RelayHealth::Reachable));
    assert_eq!(
        snapshot.relay_health.get("wss://down-1.example"),
        Some(&RelayHealth::Unreachable)
    );
}

#[tokio::test(start_paused = true)]
async fn test_total_unreachability_reports_every_relay() {
    let transport = MockTransport::new();
    let relays = ["wss://a.example", "wss://b.example", "wss://c.example"];
    let manager = manager(&relays, transport.clone());

    let err = manager.ensure_connection().await.unwrap_err();

    let report = match err {
        ClientError::NoRelaysReachable(report) => report,
        other => panic!("expected NoRelaysReachable, got {:?}", other),
    };
    let urls: Vec<&str> = report.results().iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls, relays);
    for result in report.results() {
        assert_eq!(result.failure, Some(ProbeFailure::Timeout));
        // Reported from the retry round
        assert!(result.elapsed_ms >= 9000);
    }
    let display = report.to_string();
    assert!(display.starts_with("FAIL wss://a.example ("));
    assert!(display.contains("ms timeout) | FAIL wss://b.example ("));

    // One round plus one retry
    assert_eq!(transport.probe_count(), 6);
    let snapshot = manager.snapshot();
    assert_eq!(snapshot.status, ConnectionStatus::Error);
    assert!(snapshot.last_error.unwrap().contains("wss://c.example"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_with_longer_timeout_recovers_slow_relay() {
    let transport = MockTransport::new().reachable("wss://slow.example", Duration::from_millis(6000));
    let manager = manager(&["wss://slow.example"], transport.clone());

    let handle = manager.ensure_connection().await.unwrap();

    assert_eq!(handle.relays(), ["wss://slow.example".to_string()]);
    assert_eq!(transport.probe_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_attempt() {
    let transport = MockTransport::new()
        .reachable("wss://a.example", Duration::from_millis(30))
        .reachable("wss://b.example", Duration::from_millis(10));
    let manager = manager(&["wss://a.example", "wss://b.example"], transport.clone());

    let (first, second, third) = tokio::join!(
        manager.ensure_connection(),
        manager.ensure_connection(),
        manager.ensure_connection()
    );

    let first = first.unwrap();
    assert_eq!(first.relays(), second.unwrap().relays());
    assert_eq!(first.relays(), third.unwrap().relays());
    assert_eq!(transport.probe_count(), 2);

    // Later calls reuse the established handle
    manager.ensure_connection().await.unwrap();
    assert_eq!(transport.probe_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_fastest_relays_are_kept() {
    let transport = MockTransport::new()
        .reachable("wss://a.example", Duration::from_millis(300))
        .reachable("wss://b.example", Duration::from_millis(100))
        .reachable("wss://c.example", Duration::from_millis(200));
    let manager = Arc::new(ConnectionManager::new(
        vec![
            "wss://a.example".to_string(),
            "wss://b.example/".to_string(),
            " wss://c.example ".to_string(),
            "wss://b.example".to_string(),
        ],
        transport.clone(),
        ManagerConfig {
            max_connected_relays: 2,
            ..ManagerConfig::default()
        },
    ));

    let handle = manager.ensure_connection().await.unwrap();

    assert_eq!(
        handle.relays(),
        ["wss://b.example".to_string(), "wss://c.example".to_string()]
    );
    assert_eq!(transport.probe_count(), 3);
}

#[tokio::test]
async fn test_no_valid_relays_is_config_error() {
    let transport = MockTransport::new();
    let manager = manager(&["https://web.example", "not a url", "  "], transport.clone());

    let err = manager.ensure_connection().await.unwrap_err();

    assert!(matches!(err, ClientError::Config(ref m) if m == "No valid relay URLs configured."));
    assert_eq!(transport.probe_count(), 0);
    assert_eq!(manager.status(), ConnectionStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_and_dispose() {
    let transport = MockTransport::new().reachable("wss://a.example", Duration::from_millis(5));
    let manager = manager(&["wss://a.example"], transport.clone());
    let mut status = manager.subscribe_status();

    manager.ensure_connection().await.unwrap();
    assert!(manager.current().await.is_some());
    assert_eq!(status.borrow_and_update().status, ConnectionStatus::Connected);

    manager.reconnect().await.unwrap();
    assert_eq!(transport.probe_count(), 2);
    assert_eq!(transport.close_count(), 1);

    manager.dispose().await;
    assert!(manager.current().await.is_none());
    assert_eq!(manager.status(), ConnectionStatus::Idle);
    assert_eq!(transport.close_count(), 2);
}
