mod harness;

use std::sync::Arc;
use std::time::Duration;

use harness::{artifact, fast_settings, wait_for, Gate, GatewayHandle, MockWorker, WORKER_KEY};
use mapanim_fleet::InMemoryFleet;
use mapanim_gateway::job::JobPhase;

const JOB: &str = r#"{"style":"satellite","path":[[8.54,47.37],[8.55,47.38]],"fps":30}"#;

#[tokio::test]
async fn single_job_streams_artifact_and_relays_headers() {
    let worker = MockWorker::spawn("render-worker-1").await;
    let fleet = Arc::new(InMemoryFleet::with_workers([worker.addr]));
    let gateway = GatewayHandle::spawn(fleet.clone(), fast_settings(4)).await;

    let response = gateway.submit(JOB).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "video/mp4");
    assert_eq!(response.headers()["x-render-worker"], "render-worker-1");
    assert_eq!(response.text().await.unwrap(), artifact());

    assert_eq!(worker.renders(), 1);
    assert_eq!(worker.last_body().unwrap(), JOB.as_bytes());
    assert_eq!(fleet.resize_calls(), vec![1]);

    wait_for("job release", || {
        gateway.gateway.ledger().demand() == 0 && gateway.gateway.ledger().occupied_count() == 0
    })
    .await;
}

#[tokio::test]
async fn worker_credential_defaults_to_configured_key() {
    let worker = MockWorker::spawn("render-worker-1").await;
    let fleet = Arc::new(InMemoryFleet::with_workers([worker.addr]));
    let gateway = GatewayHandle::spawn(fleet, fast_settings(1)).await;

    let response = gateway.submit(JOB).await;
    assert_eq!(response.status(), 200);
    response.bytes().await.unwrap();
    assert_eq!(worker.last_api_key().as_deref(), Some(WORKER_KEY));

    wait_for("job release", || gateway.gateway.ledger().demand() == 0).await;

    let response = gateway
        .client
        .post(gateway.url("/render"))
        .header("x-api-key", "caller-key")
        .body(JOB)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.bytes().await.unwrap();
    assert_eq!(worker.last_api_key().as_deref(), Some("caller-key"));
}

#[tokio::test]
async fn probe_treats_missing_health_route_as_alive() {
    let worker = MockWorker::spawn("render-worker-1").await;
    worker.set_health_status(404);
    let fleet = Arc::new(InMemoryFleet::with_workers([worker.addr]));
    let gateway = GatewayHandle::spawn(fleet, fast_settings(1)).await;

    let response = gateway.submit(JOB).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), artifact());
}

#[tokio::test]
async fn unhealthy_worker_still_receives_job() {
    let worker = MockWorker::spawn("render-worker-1").await;
    worker.set_health_status(503);
    let fleet = Arc::new(InMemoryFleet::with_workers([worker.addr]));
    let gateway = GatewayHandle::spawn(fleet, fast_settings(1)).await;

    let response = gateway.submit(JOB).await;
    assert_eq!(response.status(), 200);
    assert_eq!(worker.renders(), 1);
}

#[tokio::test]
async fn fleet_cap_queues_excess_jobs_until_a_worker_frees() {
    let gate = Gate::closed();
    let workers = [
        MockWorker::spawn_gated("render-worker-1", &gate).await,
        MockWorker::spawn_gated("render-worker-2", &gate).await,
        MockWorker::spawn_gated("render-worker-3", &gate).await,
    ];
    let fleet = Arc::new(InMemoryFleet::with_workers(workers.iter().map(|w| w.addr)));
    let gateway = Arc::new(GatewayHandle::spawn(fleet.clone(), fast_settings(2)).await);

    let mut jobs = Vec::new();
    for _ in 0..3 {
        let gateway = Arc::clone(&gateway);
        jobs.push(tokio::spawn(async move {
            let response = gateway.submit(JOB).await;
            let status = response.status();
            (status, response.text().await.unwrap())
        }));
    }

    wait_for("two jobs routed and one waiting", || {
        let snapshot = gateway.gateway.ledger().snapshot();
        snapshot.demand == 3
            && snapshot.occupied.len() == 2
            && snapshot.count(JobPhase::AwaitingWorker) == 1
    })
    .await;

    // One resize per admission, each sized from demand at that moment and capped.
    let calls = fleet.resize_calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|&size| size <= 2));
    assert_eq!(fleet.size(), 2);
    assert_eq!(workers[2].renders(), 0);

    gate.open(1);
    wait_for("queued job routed", || {
        gateway.gateway.ledger().snapshot().count(JobPhase::AwaitingWorker) == 0
    })
    .await;
    gate.open(2);

    for job in jobs {
        let (status, body) = job.await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, artifact());
    }

    let total: u32 = workers.iter().map(MockWorker::renders).sum();
    assert_eq!(total, 3);
    assert_eq!(workers[2].renders(), 0);
    for worker in &workers {
        assert!(worker.max_in_flight() <= 1);
    }

    wait_for("all jobs released", || {
        let snapshot = gateway.gateway.ledger().snapshot();
        snapshot.demand == 0 && snapshot.occupied.is_empty() && snapshot.jobs.is_empty()
    })
    .await;
}

#[tokio::test]
async fn caller_disconnect_keeps_worker_claimed_until_render_ends() {
    let gate = Gate::closed();
    let worker = MockWorker::spawn_gated("render-worker-1", &gate).await;
    let fleet = Arc::new(InMemoryFleet::with_workers([worker.addr]));
    let mut settings = fast_settings(1);
    settings.admission.poll_attempts = 250;
    let gateway = Arc::new(GatewayHandle::spawn(fleet, settings).await);

    let impatient = reqwest::Client::builder()
        .timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    let abandoned = {
        let url = gateway.url("/render");
        tokio::spawn(async move { impatient.post(url).body(JOB).send().await })
    };
    wait_for("first render started", || worker.renders() == 1).await;
    assert!(abandoned.await.unwrap().is_err());

    // The caller is gone before any head was sent; the render is still running.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(gateway.gateway.ledger().is_occupied(&worker.addr));
    assert_eq!(gateway.gateway.ledger().demand(), 1);

    let second = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            let response = gateway.submit(JOB).await;
            let status = response.status();
            (status, response.text().await.unwrap())
        })
    };
    wait_for("second job waiting", || {
        gateway.gateway.ledger().snapshot().count(JobPhase::AwaitingWorker) == 1
    })
    .await;
    assert_eq!(worker.renders(), 1);

    gate.open(2);
    let (status, body) = second.await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body, artifact());
    assert_eq!(worker.renders(), 2);
    assert_eq!(worker.max_in_flight(), 1);

    wait_for("all jobs released", || {
        let snapshot = gateway.gateway.ledger().snapshot();
        snapshot.demand == 0 && snapshot.occupied.is_empty() && snapshot.jobs.is_empty()
    })
    .await;
}
