use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::put;
use axum::Router;
use reqwest::Url;
use serde_json::json;

use rclone_to_b2_core::contract::MetricsPusher;
use rclone_to_b2_core::error::PushError;
use rclone_to_b2_core::metrics::RunStatsCollector;
use rclone_to_b2_core::pushgateway::PushGateway;
use rclone_to_b2_core::stats::RunStatistics;

#[derive(Debug, Clone)]
struct ReceivedPush {
    job: String,
    content_type: String,
    body: String,
}

#[derive(Clone)]
struct GatewayState {
    status: StatusCode,
    received: Arc<Mutex<Vec<ReceivedPush>>>,
}

async fn record_push(
    State(state): State<GatewayState>,
    Path(job): Path<String>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, &'static str) {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.received.lock().unwrap().push(ReceivedPush {
        job,
        content_type,
        body,
    });
    let reply = if state.status.is_success() { "" } else { "push rejected" };
    (state.status, reply)
}

async fn spawn_gateway(status: StatusCode) -> (SocketAddr, Arc<Mutex<Vec<ReceivedPush>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/metrics/job/:job", put(record_push))
        .with_state(GatewayState {
            status,
            received: received.clone(),
        });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, received)
}

fn run_families() -> Vec<prometheus::proto::MetricFamily> {
    let stats = RunStatistics::try_from(json!({
        "errors": 1,
        "checks": 10,
        "totalChecks": 10,
        "transfers": 3,
        "totalTransfers": 3,
        "deletedDirs": 1,
        "deletes": 4,
        "renames": 0,
        "elapsedTime": 2.25,
        "speed": 512.0,
        "bytes": 4096,
        "totalBytes": 4096
    }))
    .unwrap();
    let finished = UNIX_EPOCH + Duration::from_secs(1_760_000_000);
    RunStatsCollector::at("host-1", &stats, finished)
        .unwrap()
        .into_registry()
        .unwrap()
        .gather()
}

#[tokio::test]
async fn push_replaces_job_group_in_text_format() {
    let (addr, received) = spawn_gateway(StatusCode::OK).await;
    let gateway = PushGateway::new(Url::parse(&format!("http://{addr}")).unwrap());

    gateway
        .push("rcloneReporter", run_families())
        .await
        .expect("push should be accepted");

    let pushes = received.lock().unwrap();
    assert_eq!(pushes.len(), 1);
    let push = &pushes[0];
    assert_eq!(push.job, "rcloneReporter");
    assert!(push.content_type.starts_with("text/plain"));
    assert!(push
        .body
        .contains(r#"job_last_success_unixtime{instance="host-1"} 1760000000"#));
    assert!(push.body.contains(r#"rclone_elapsed_time{instance="host-1"} 2250"#));
    assert!(push.body.contains(r#"rclone_deleted_files{instance="host-1"} 4"#));
    assert!(push.body.contains("# TYPE rclone_transfer_bytes gauge"));
}

#[tokio::test]
async fn rejected_push_reports_status_and_body() {
    let (addr, received) = spawn_gateway(StatusCode::INTERNAL_SERVER_ERROR).await;
    let gateway = PushGateway::new(Url::parse(&format!("http://{addr}/")).unwrap());

    let err = gateway
        .push("rcloneReporter", run_families())
        .await
        .unwrap_err();
    match err {
        PushError::Rejected { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "push rejected");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(received.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unreachable_gateway_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let gateway = PushGateway::new(Url::parse(&format!("http://{addr}")).unwrap());
    assert!(matches!(
        gateway.push("rcloneReporter", run_families()).await,
        Err(PushError::Transport(_))
    ));
}
