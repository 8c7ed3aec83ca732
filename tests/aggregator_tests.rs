mod common;

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use router_honeypot::aggregator::{AggregatorHandle, DetectionConfig, ScanAggregator};
use router_honeypot::alerting::Alerting;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use common::{recording, recording_alerting, Broken, HangingResolver, StaticResolver};

const LONG: Duration = Duration::from_secs(30);

fn attacker(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(203, 0, 113, last))
}

fn start(alerting: Alerting) -> (AggregatorHandle, JoinHandle<()>, CancellationToken) {
    start_with(DetectionConfig::default(), alerting)
}

fn start_with(
    config: DetectionConfig,
    alerting: Alerting,
) -> (AggregatorHandle, JoinHandle<()>, CancellationToken) {
    let cancel = CancellationToken::new();
    let (handle, task) = ScanAggregator::new(config, alerting).spawn(cancel.clone());
    (handle, task, cancel)
}

#[tokio::test(start_paused = true)]
async fn fewer_than_threshold_ports_never_alert() {
    let (alerting, mut captured) = recording();
    let (handle, _task, _cancel) = start(alerting);
    let src = attacker(1);

    handle.record_probe(src, 21).await;
    sleep(Duration::from_millis(100)).await;
    handle.record_probe(src, 22).await;
    handle.record_probe(src, 22).await;

    let tracked = handle.active_sources().await;
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].ports, vec![21, 22]);
    assert!(!tracked[0].armed);

    assert_eq!(captured.next_scan(LONG).await, None);
}

#[tokio::test(start_paused = true)]
async fn quiet_sources_below_threshold_are_forgotten() {
    let (alerting, mut captured) = recording();
    let (handle, _task, _cancel) = start(alerting);

    handle.record_probe(attacker(1), 443).await;
    sleep(DetectionConfig::default().idle + Duration::from_millis(10)).await;

    assert!(handle.active_sources().await.is_empty());
    assert_eq!(captured.next_scan(LONG).await, None);
}

#[tokio::test(start_paused = true)]
async fn burst_reaching_threshold_alerts_once_after_quiet_window() {
    let (alerting, mut captured) = recording();
    let (handle, _task, _cancel) = start(alerting);
    let src = attacker(2);

    for port in [21, 22, 23] {
        handle.record_probe(src, port).await;
        sleep(Duration::from_millis(100)).await;
    }
    let last_probe = Instant::now() - Duration::from_millis(100);

    // Nothing yet inside the window.
    assert_eq!(captured.next_scan(Duration::from_millis(4800)).await, None);

    let line = captured.next_scan(LONG).await.expect("scan alert");
    let waited = last_probe.elapsed();
    assert!(waited >= Duration::from_millis(5000), "fired after {waited:?}");
    assert!(waited < Duration::from_millis(5100), "fired after {waited:?}");
    assert!(line.ends_with("PORT SCAN DETECTED: 203.0.113.2; unknown; ports 21, 22, 23"));

    let (subject, body) = captured.mails.recv().await.expect("mail");
    assert_eq!(subject, "PORT SCAN DETECTED ON HONEYPOT");
    assert!(body.contains("21, 22, 23"));

    assert_eq!(captured.next_scan(LONG).await, None);
    assert!(handle.active_sources().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn late_probe_within_window_rearms_and_merges_ports() {
    let (alerting, mut captured) = recording();
    let (handle, _task, _cancel) = start(alerting);
    let src = attacker(3);

    handle.record_probe(src, 21).await;
    handle.record_probe(src, 22).await;
    handle.record_probe(src, 23).await;
    sleep(Duration::from_millis(4000)).await;
    handle.record_probe(src, 8080).await;

    // The first deadline passes without an alert.
    assert_eq!(captured.next_scan(Duration::from_millis(4500)).await, None);

    let line = captured.next_scan(LONG).await.expect("scan alert");
    assert!(line.ends_with("ports 21, 22, 23, 8080"));
}

#[tokio::test(start_paused = true)]
async fn repeated_port_while_armed_resets_timer_without_duplicates() {
    let (alerting, mut captured) = recording();
    let (handle, _task, _cancel) = start(alerting);
    let src = attacker(4);

    for port in [21, 22, 23] {
        handle.record_probe(src, port).await;
    }
    sleep(Duration::from_millis(3000)).await;
    handle.record_probe(src, 23).await;

    assert_eq!(captured.next_scan(Duration::from_millis(4000)).await, None);
    let line = captured.next_scan(LONG).await.expect("scan alert");
    assert!(line.ends_with("ports 21, 22, 23"));
}

#[tokio::test(start_paused = true)]
async fn probe_after_alert_starts_a_new_cycle() {
    let (alerting, mut captured) = recording();
    let (handle, _task, _cancel) = start(alerting);
    let src = attacker(5);

    for port in [21, 22, 80] {
        handle.record_probe(src, port).await;
    }
    let first = captured.next_scan(LONG).await.expect("first alert");
    assert!(first.ends_with("ports 21, 22, 80"));

    handle.record_probe(src, 21).await;
    let tracked = handle.active_sources().await;
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].ports, vec![21]);
    assert!(!tracked[0].armed);

    assert_eq!(captured.next_scan(LONG).await, None);
}

#[tokio::test(start_paused = true)]
async fn concurrent_sources_are_reported_separately() {
    let (alerting, mut captured) = recording();
    let (handle, _task, _cancel) = start(alerting);
    let (a, b) = (attacker(6), attacker(7));

    for (pa, pb) in [(21, 1000), (22, 1001), (23, 1002)] {
        handle.record_probe(a, pa).await;
        handle.record_probe(b, pb).await;
        sleep(Duration::from_millis(50)).await;
    }

    let lines = [
        captured.next_scan(LONG).await.expect("first alert"),
        captured.next_scan(LONG).await.expect("second alert"),
    ];
    let for_source = |ip: &str| {
        lines
            .iter()
            .find(|l| l.contains(&format!("DETECTED: {ip};")))
            .cloned()
            .unwrap_or_default()
    };
    assert!(for_source("203.0.113.6").ends_with("ports 21, 22, 23"));
    assert!(for_source("203.0.113.7").ends_with("ports 1000, 1001, 1002"));
    assert_eq!(captured.next_scan(LONG).await, None);
}

#[tokio::test(start_paused = true)]
async fn threshold_of_one_arms_on_first_probe() {
    let (alerting, mut captured) = recording();
    let config = DetectionConfig {
        threshold: 1,
        ..Default::default()
    };
    let (handle, _task, _cancel) = start_with(config, alerting);

    handle.record_probe(attacker(8), 25).await;
    let tracked = handle.active_sources().await;
    assert!(tracked[0].armed);

    let line = captured.next_scan(LONG).await.expect("scan alert");
    assert!(line.ends_with("ports 25"));
}

#[tokio::test(start_paused = true)]
async fn mapped_ipv6_peer_is_the_same_source() {
    let (alerting, mut captured) = recording();
    let (handle, _task, _cancel) = start(alerting);
    let v4 = Ipv4Addr::new(198, 51, 100, 9);

    handle.record_probe(IpAddr::V4(v4), 21).await;
    handle
        .record_probe(IpAddr::V6(v4.to_ipv6_mapped()), 22)
        .await;
    handle.record_probe(IpAddr::V4(v4), 23).await;

    let line = captured.next_scan(LONG).await.expect("scan alert");
    assert!(line.ends_with("198.51.100.9; unknown; ports 21, 22, 23"));

    let v6 = IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1));
    handle.record_probe(v6, 21).await;
    assert_eq!(handle.active_sources().await[0].source, v6);
}

#[tokio::test(start_paused = true)]
async fn alert_carries_resolved_identity() {
    let mut table = HashMap::new();
    table.insert(attacker(9), "8c:de:f9:01:02:03".to_string());
    let (alerting, mut captured) = recording_alerting(Arc::new(StaticResolver(table)));
    let (handle, _task, _cancel) = start(alerting);

    for port in [135, 139, 445] {
        handle.record_probe(attacker(9), port).await;
    }

    let line = captured.next_scan(LONG).await.expect("scan alert");
    assert!(line.ends_with("203.0.113.9; 8c:de:f9:01:02:03; ports 135, 139, 445"));
}

#[tokio::test(start_paused = true)]
async fn stalled_identity_lookup_degrades_to_unknown() {
    let (alerting, mut captured) = recording_alerting(Arc::new(HangingResolver));
    let alerting = alerting.with_identity_timeout(Duration::from_millis(500));
    let (handle, _task, _cancel) = start(alerting);

    for port in [1, 2, 3] {
        handle.record_probe(attacker(10), port).await;
    }

    let line = captured.next_scan(LONG).await.expect("scan alert");
    assert!(line.contains("203.0.113.10; unknown;"));
}

#[tokio::test(start_paused = true)]
async fn failing_sinks_still_release_state() {
    let alerting = Alerting::new(
        Arc::new(StaticResolver::default()),
        Arc::new(Broken),
        Arc::new(Broken),
    );
    let (handle, _task, _cancel) = start(alerting);

    for port in [21, 22, 23] {
        handle.record_probe(attacker(11), port).await;
    }
    assert_eq!(handle.active_sources().await.len(), 1);

    sleep(Duration::from_millis(5100)).await;
    assert!(handle.active_sources().await.is_empty());

    // A fresh cycle still works after the failed delivery.
    handle.record_probe(attacker(11), 80).await;
    assert_eq!(handle.active_sources().await[0].ports, vec![80]);
}

#[tokio::test(start_paused = true)]
async fn dropping_every_handle_flushes_pending_alerts() {
    let (alerting, mut captured) = recording();
    let (handle, task, _cancel) = start(alerting);

    for port in [21, 22, 23] {
        handle.record_probe(attacker(12), port).await;
    }
    drop(handle);

    let line = captured.next_scan(LONG).await.expect("scan alert");
    assert!(line.ends_with("ports 21, 22, 23"));
    tokio::time::timeout(LONG, task)
        .await
        .expect("aggregator exits")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancellation_discards_pending_sources() {
    let (alerting, mut captured) = recording();
    let (handle, task, cancel) = start(alerting);

    for port in [21, 22, 23] {
        handle.record_probe(attacker(13), port).await;
    }
    assert_eq!(handle.active_sources().await.len(), 1);

    cancel.cancel();
    task.await.unwrap();

    assert_eq!(captured.next_scan(LONG).await, None);
    assert!(handle.active_sources().await.is_empty());
}
