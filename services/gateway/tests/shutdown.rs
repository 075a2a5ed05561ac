mod harness;

use std::sync::Arc;

use harness::{
    artifact, fast_settings, wait_for, Gate, GatewayHandle, MockWorker, SHUTDOWN_KEY,
};
use mapanim_fleet::InMemoryFleet;
use serde_json::Value;

const JOB: &str = r#"{"style":"night","fps":60}"#;

#[tokio::test]
async fn wrong_key_is_forbidden_and_changes_nothing() {
    let fleet = Arc::new(InMemoryFleet::new());
    fleet.set_size(2);
    let gateway = GatewayHandle::spawn(fleet.clone(), fast_settings(2)).await;
    let before = gateway.gateway.ledger().snapshot();

    for key in [Some("guess"), Some(""), None] {
        let response = gateway.shutdown(key).await;
        assert_eq!(response.status(), 403);
        let problem: Value = response.json().await.unwrap();
        assert_eq!(problem["code"], "forbidden");
    }

    assert!(fleet.resize_calls().is_empty());
    assert_eq!(fleet.size(), 2);
    assert_eq!(gateway.gateway.ledger().snapshot(), before);
}

#[tokio::test]
async fn valid_key_scales_to_zero_and_clears_ledger() {
    let gate = Gate::closed();
    let worker = MockWorker::spawn_gated("render-worker-1", &gate).await;
    let fleet = Arc::new(InMemoryFleet::with_workers([worker.addr]));
    let gateway = Arc::new(GatewayHandle::spawn(fleet.clone(), fast_settings(1)).await);

    let job = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            let response = gateway.submit(JOB).await;
            let status = response.status();
            (status, response.text().await.unwrap())
        })
    };
    wait_for("job in flight", || worker.renders() == 1).await;
    assert!(gateway.gateway.ledger().is_occupied(&worker.addr));

    let response = gateway.shutdown(Some(SHUTDOWN_KEY)).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "scaling_to_zero");
    assert_eq!(body["requested_workers"], 0);

    assert_eq!(fleet.resize_calls(), vec![1, 0]);
    let snapshot = gateway.gateway.ledger().snapshot();
    assert_eq!(snapshot.demand, 0);
    assert!(snapshot.occupied.is_empty());
    assert!(snapshot.jobs.is_empty());

    // The job started before the reset finishes without touching the new ledger.
    gate.open(1);
    let (status, body) = job.await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body, artifact());

    let snapshot = gateway.gateway.ledger().snapshot();
    assert_eq!(snapshot.demand, 0);
    assert!(snapshot.occupied.is_empty());
}

#[tokio::test]
async fn failed_resize_reports_shutdown_failure() {
    let fleet = Arc::new(InMemoryFleet::new());
    fleet.set_size(1);
    fleet.fail_resize(Some("operation in progress"));
    let gateway = GatewayHandle::spawn(fleet.clone(), fast_settings(2)).await;

    let response = gateway.shutdown(Some(SHUTDOWN_KEY)).await;
    assert_eq!(response.status(), 500);
    let problem: Value = response.json().await.unwrap();
    assert_eq!(problem["code"], "shutdown_failed");

    assert_eq!(fleet.resize_calls(), vec![0]);
    assert_eq!(fleet.size(), 1);
}
