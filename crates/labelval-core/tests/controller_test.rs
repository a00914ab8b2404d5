#![allow(clippy::unwrap_used)]
// Integration tests for `DeviceController` composites.
//
// Commands go to a wiremock node; events are injected through
// `handle_event`, the same entry point the event stream drives.

use std::time::Duration;

use futures_util::StreamExt;
use labelval_core::api::events::{Detection, Region, RepeatNotice, SetupDetect, StateChange};
use labelval_core::api::{ConnectionState, Credentials, InspectionEvent, NodeEndpoint};
use labelval_core::{CoreError, DeviceController, DeviceState, NodeConfig};
use secrecy::SecretString;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, DeviceController) {
    let server = MockServer::start().await;
    let port = server.address().port();
    let endpoint = NodeEndpoint::new("127.0.0.1", port, 1).with_node_port(port);
    let creds = Credentials::new("admin", SecretString::from("admin".to_owned()));
    let ctrl = DeviceController::new(NodeConfig::new(endpoint, creds)).unwrap();
    (server, ctrl)
}

fn node_path(suffix: &str) -> String {
    format!("/api/printinspection/1/{suffix}")
}

async fn mount_ok(server: &MockServer, verb: &str, suffix: &str) {
    Mock::given(method(verb))
        .and(path(node_path(suffix)))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(server)
        .await;
}

fn state_change(from: &str, to: &str) -> InspectionEvent {
    InspectionEvent::StateChange(StateChange {
        from_state: from.into(),
        to_state: to.into(),
    })
}

fn label_end(repeat: u32) -> InspectionEvent {
    InspectionEvent::LabelEnd(RepeatNotice {
        repeat,
        position: None,
        repeat_width: None,
        repeat_height: None,
    })
}

/// Deliver `event` to the controller after `delay`.
fn emit_later(ctrl: &DeviceController, delay: Duration, event: InspectionEvent) {
    let ctrl = ctrl.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        ctrl.handle_event(&event);
    });
}

// ── State tracking ──────────────────────────────────────────────────

#[tokio::test]
async fn test_job_name_fetched_when_leaving_idle() {
    let (server, ctrl) = setup().await;
    Mock::given(method("GET"))
        .and(path(node_path("inspection/job")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"name": "GS1_TABLE1", "sectors": []})),
        )
        .mount(&server)
        .await;

    let mut status = ctrl.watch_status();
    ctrl.handle_event(&state_change("idle", "editing"));

    let status = tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|s| s.job_name.is_some()),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(status.state, DeviceState::Editing);
    assert_eq!(status.job_name.as_deref(), Some("GS1_TABLE1"));

    ctrl.handle_event(&state_change("editing", "idle"));
    assert_eq!(ctrl.job_name(), None);
}

// ── Inspect ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_inspect_waits_for_label_end() {
    let (server, ctrl) = setup().await;
    Mock::given(method("PUT"))
        .and(path(node_path("inspection/setup/image")))
        .and(query_param("source", "history"))
        .and(query_param("repeat", "3"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    mount_ok(&server, "PUT", "inspection/setup/inspect").await;
    ctrl.handle_event(&state_change("idle", "editing"));

    emit_later(&ctrl, Duration::from_millis(200), label_end(3));
    tokio_test::assert_ok!(ctrl.inspect(3, Duration::from_secs(10)).await);
}

#[tokio::test]
async fn test_inspect_without_label_end_times_out_promptly() {
    let (server, ctrl) = setup().await;
    mount_ok(&server, "PUT", "inspection/setup/inspect").await;

    let started = tokio::time::Instant::now();
    let err = ctrl
        .inspect(0, Duration::from_millis(10))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.status(), "inspect timed out");
    assert!(started.elapsed() < Duration::from_millis(110));
}

#[tokio::test]
async fn test_inspect_surfaces_transport_status_unchanged() {
    let (server, ctrl) = setup().await;
    Mock::given(method("PUT"))
        .and(path(node_path("inspection/setup/inspect")))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&server)
        .await;

    let err = ctrl.inspect(0, Duration::from_secs(1)).await.unwrap_err();
    assert_eq!(err.status(), "503 Service Unavailable");
}

// ── Detect ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_detect_sectors_returns_terminal_detections() {
    let (server, ctrl) = setup().await;
    Mock::given(method("GET"))
        .and(path(node_path("inspection/setup/detect")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    mount_ok(&server, "PUT", "inspection/setup/detect").await;

    let detection = Detection {
        symbology: "dataMatrix".into(),
        region: Region {
            x: 10,
            y: 20,
            width: 30,
            height: 40,
        },
        orientation: 0,
    };
    emit_later(
        &ctrl,
        Duration::from_millis(50),
        InspectionEvent::SetupDetect(SetupDetect {
            terminal: true,
            detections: vec![detection.clone()],
        }),
    );

    let result = ctrl.detect_sectors(Duration::from_secs(5)).await.unwrap();
    assert_eq!(result.detections, vec![detection]);
}

#[tokio::test]
async fn test_detect_timeout_leaves_state_unchanged() {
    let (server, ctrl) = setup().await;
    Mock::given(method("GET"))
        .and(path(node_path("inspection/setup/detect")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    mount_ok(&server, "PUT", "inspection/setup/detect").await;
    ctrl.handle_event(&state_change("idle", "editing"));

    let err = ctrl
        .detect_sectors(Duration::from_millis(20))
        .await
        .unwrap_err();
    assert_eq!(err.status(), "detect sectors timed out");
    assert_eq!(ctrl.state(), DeviceState::Editing);
}

// ── Mode switches ───────────────────────────────────────────────────

#[tokio::test]
async fn test_switch_to_edit_waits_for_editing() {
    let (server, ctrl) = setup().await;
    mount_ok(&server, "PUT", "inspection/job/stop").await;
    ctrl.handle_event(&state_change("editing", "running"));

    emit_later(
        &ctrl,
        Duration::from_millis(30),
        state_change("running", "editing"),
    );
    tokio_test::assert_ok!(ctrl.switch_to_edit(Duration::from_secs(5)).await);
    assert_eq!(ctrl.state(), DeviceState::Editing);
}

#[tokio::test]
async fn test_switch_to_edit_times_out_without_state_change() {
    let (server, ctrl) = setup().await;
    mount_ok(&server, "PUT", "inspection/job/stop").await;
    ctrl.handle_event(&state_change("editing", "running"));

    let err = ctrl
        .switch_to_edit(Duration::from_millis(20))
        .await
        .unwrap_err();
    assert_eq!(err.status(), "switch to edit timed out");
}

#[tokio::test]
async fn test_switch_to_run_requires_job_name() {
    let (_server, ctrl) = setup().await;
    // No job mock: the name fetch fails and the name stays unknown.
    ctrl.handle_event(&state_change("idle", "editing"));

    assert!(matches!(
        ctrl.switch_to_run(Duration::from_secs(5)).await,
        Err(CoreError::NoJobName)
    ));
}

#[tokio::test]
async fn test_switch_to_run_issues_run_sequence() {
    let (server, ctrl) = setup().await;
    Mock::given(method("GET"))
        .and(path(node_path("inspection/job")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "JOB_A"})))
        .mount(&server)
        .await;
    mount_ok(&server, "GET", "inspection/job/runready").await;
    Mock::given(method("PUT"))
        .and(path(node_path("inspection/job/run")))
        .and(body_json(json!({"name": "JOB_A"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    mount_ok(&server, "PUT", "inspection/job/start").await;

    let mut status = ctrl.watch_status();
    ctrl.handle_event(&state_change("idle", "editing"));
    tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|s| s.job_name.is_some()),
    )
    .await
    .unwrap()
    .unwrap();

    emit_later(
        &ctrl,
        Duration::from_millis(50),
        state_change("editing", "running"),
    );
    tokio_test::assert_ok!(ctrl.switch_to_run(Duration::from_secs(5)).await);
}

// ── Read ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_read_while_paused_releases_repeat_and_resumes() {
    let (server, ctrl) = setup().await;
    // Only a Running node reads the run-mode list.
    Mock::given(method("GET"))
        .and(path(node_path("inspection/setup/image/available")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([12, 11])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(node_path("inspection/repeat/available")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([99])))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(node_path("inspection/repeat/reports/12")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"overallGrade": "A"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(node_path("inspection/repeat/images/12")))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(node_path("inspection/job")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "JOB_A"})))
        .mount(&server)
        .await;
    mount_ok(&server, "DELETE", "inspection/repeat/12").await;
    mount_ok(&server, "PUT", "inspection/job/resume").await;

    ctrl.handle_event(&state_change("running", "paused"));
    let read = ctrl.read(0).await.unwrap();

    assert_eq!(read.report.repeat, 12);
    assert_eq!(read.report.report["overallGrade"], "A");
    assert!(read.report.image.is_none());
    assert_eq!(read.job.name, "JOB_A");
}

#[tokio::test]
async fn test_read_short_circuits_on_failed_report() {
    let (server, ctrl) = setup().await;
    Mock::given(method("GET"))
        .and(path(node_path("inspection/repeat/reports/4")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    // One fetch for the job name on entering Running; `read` adds none.
    Mock::given(method("GET"))
        .and(path(node_path("inspection/job")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "JOB_A"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut status = ctrl.watch_status();
    ctrl.handle_event(&state_change("editing", "running"));
    tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|s| s.job_name.is_some()),
    )
    .await
    .unwrap()
    .unwrap();

    let err = ctrl.read(4).await.unwrap_err();
    assert_eq!(err.status(), "404 Not Found");
}

#[tokio::test]
async fn test_read_while_editing_inspects_available_repeat() {
    let (server, ctrl) = setup().await;
    Mock::given(method("GET"))
        .and(path(node_path("inspection/setup/image/available")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([7, 6])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(node_path("inspection/setup/image")))
        .and(query_param("repeat", "7"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    mount_ok(&server, "PUT", "inspection/setup/inspect").await;
    Mock::given(method("GET"))
        .and(path(node_path("inspection/setup/report")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"overallGrade": "B"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(node_path("inspection/repeat/reports/7")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(node_path("inspection/repeat/images/7")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x89PNG".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(node_path("inspection/job")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "JOB_A"})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(node_path("inspection/repeat/7")))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    ctrl.handle_event(&state_change("idle", "editing"));
    emit_later(&ctrl, Duration::from_millis(200), label_end(7));
    let read = ctrl.read(0).await.unwrap();

    assert_eq!(read.report.repeat, 7);
    assert_eq!(read.report.report["overallGrade"], "B");
    assert!(read.report.image.is_some());
    assert_eq!(ctrl.state(), DeviceState::Editing);
}

// ── Login ───────────────────────────────────────────────────────────

/// Front `server` on a new port that also accepts the event-stream
/// upgrade, which wiremock cannot serve. Returns a controller pointed at it.
async fn setup_with_events(server: &MockServer) -> DeviceController {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let backend = *server.address();

    tokio::spawn(async move {
        while let Ok((mut inbound, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut head = [0u8; 256];
                let n = inbound.peek(&mut head).await.unwrap_or(0);
                let is_events = head[..n].windows(18).any(|w| w == b"/inspection/events");
                if is_events {
                    if let Ok(mut ws) = tokio_tungstenite::accept_async(inbound).await {
                        while let Some(Ok(_)) = ws.next().await {}
                    }
                } else if let Ok(mut outbound) = TcpStream::connect(backend).await {
                    let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                }
            });
        }
    });

    let endpoint = NodeEndpoint::new("127.0.0.1", port, 1).with_node_port(port);
    let creds = Credentials::new("admin", SecretString::from("admin".to_owned()));
    DeviceController::new(NodeConfig::new(endpoint, creds)).unwrap()
}

#[tokio::test]
async fn test_login_failure_after_stream_start_leaves_nothing_open() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(node_path("security/login")))
        .and(query_param("monitor", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "T1",
            "accessLevel": "control"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(node_path("inspection/setup/report/extendedData")))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    mount_ok(&server, "PUT", "security/logout").await;

    let ctrl = setup_with_events(&server).await;
    let err = ctrl.login(false).await.unwrap_err();

    assert_eq!(err.status(), "500 Internal Server Error");
    assert!(!ctrl.is_logged_in());
    assert!(!ctrl.client().is_authenticated());
    assert_eq!(ctrl.stream_state(), ConnectionState::Disconnected);
}

// ── Sector maintenance ──────────────────────────────────────────────

#[tokio::test]
async fn test_delete_sectors_stops_at_first_failure() {
    let (server, ctrl) = setup().await;
    Mock::given(method("GET"))
        .and(path(node_path("inspection/job")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "JOB_A",
            "sectors": [{"name": "verify1D_1"}, {"name": "verify1D_2"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(node_path("inspection/job/sectors/verify1D_1")))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(node_path("inspection/job/sectors/verify1D_2")))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = ctrl.delete_sectors().await.unwrap_err();
    assert_eq!(err.status(), "500 Internal Server Error");
}
