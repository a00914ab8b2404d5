#![allow(clippy::unwrap_used)]
// Integration tests for `NodeClient` using wiremock.

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use labelval_api::{AccessLevel, Credentials, Error, NodeClient, NodeEndpoint};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, NodeClient) {
    let server = MockServer::start().await;
    let port = server.address().port();
    let endpoint = NodeEndpoint::new("127.0.0.1", port, 1).with_node_port(port);
    let client = NodeClient::with_client(reqwest::Client::new(), endpoint).unwrap();
    (server, client)
}

fn node_path(suffix: &str) -> String {
    format!("/api/printinspection/1/{suffix}")
}

fn credentials() -> Credentials {
    Credentials::new("admin", SecretString::from("admin".to_owned()))
}

async fn logged_in() -> (MockServer, NodeClient) {
    let (server, client) = setup().await;
    Mock::given(method("POST"))
        .and(path(node_path("security/login")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "T1"})))
        .mount(&server)
        .await;
    client.login(&credentials(), false).await.unwrap();
    (server, client)
}

// ── Authentication ──────────────────────────────────────────────────

#[tokio::test]
async fn test_login_control_session() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(node_path("security/login")))
        .and(query_param("monitor", "0"))
        .and(query_param("temporary", "0"))
        .and(body_json(json!({"user": "admin", "password": "admin"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "T1",
            "accessLevel": "control",
            "id": "user-7"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = client.login(&credentials(), false).await.unwrap();
    assert_eq!(session.access_level, AccessLevel::Control);
    assert_eq!(session.token.expose_secret(), "T1");
    assert_eq!(session.user_id.as_deref(), Some("user-7"));
    assert!(client.is_authenticated());
}

#[tokio::test]
async fn test_monitor_login_falls_back_to_requested_level() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(node_path("security/login")))
        .and(query_param("monitor", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "M1"})))
        .mount(&server)
        .await;

    let session = client.login(&credentials(), true).await.unwrap();
    assert_eq!(session.access_level, AccessLevel::Monitor);
}

#[tokio::test]
async fn test_login_rejected() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(node_path("security/login")))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = client.login(&credentials(), false).await;
    assert!(
        matches!(&result, Err(Error::Authentication { message }) if message == "401 Unauthorized"),
        "expected Authentication error, got: {result:?}"
    );
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn test_token_sent_on_later_requests() {
    let (server, client) = logged_in().await;

    Mock::given(method("GET"))
        .and(path(node_path("inspection/job")))
        .and(header("Authorization", "T1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "GS1_TABLE1",
            "sectors": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let job = client.get_job().await.unwrap();
    assert_eq!(job.name, "GS1_TABLE1");
}

#[tokio::test]
async fn test_logout_drops_token_even_on_failure() {
    let (server, client) = logged_in().await;

    Mock::given(method("PUT"))
        .and(path(node_path("security/logout")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = client.logout().await;
    assert_eq!(result.unwrap_err().status(), "500 Internal Server Error");
    assert!(!client.is_authenticated());
}

// ── Status strings ──────────────────────────────────────────────────

#[tokio::test]
async fn test_non_json_body_reports_status() {
    let (server, client) = logged_in().await;

    Mock::given(method("GET"))
        .and(path(node_path("inspection/setup/report")))
        .respond_with(ResponseTemplate::new(200).set_body_string("busy"))
        .mount(&server)
        .await;

    let err = client.get_setup_report().await.unwrap_err();
    assert_eq!(err.status(), "Return data is not JSON: \"busy\"");
}

#[tokio::test]
async fn test_commands_without_body_succeed_on_empty_response() {
    let (server, client) = logged_in().await;

    Mock::given(method("PUT"))
        .and(path(node_path("inspection/setup/image")))
        .and(query_param("source", "history"))
        .and(query_param("repeat", "3"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(node_path("inspection/setup/inspect")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    tokio_test::assert_ok!(client.set_repeat(3).await);
    tokio_test::assert_ok!(client.inspect().await);
}

#[tokio::test]
async fn test_repeat_image_gone() {
    let (server, client) = logged_in().await;

    Mock::given(method("GET"))
        .and(path(node_path("inspection/repeat/images/9")))
        .and(query_param("scale", "1.0"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let err = client.get_repeat_image(9).await.unwrap_err();
    assert!(err.is_gone());
    assert_eq!(err.status(), "410 Gone");
}

// ── Job and sectors ─────────────────────────────────────────────────

#[tokio::test]
async fn test_add_and_delete_sector() {
    let (server, client) = logged_in().await;

    let sector = json!({"name": "verify1D_1", "type": "verify1D", "symbology": "upcA"});
    Mock::given(method("PUT"))
        .and(path(node_path("inspection/job/sectors/verify1D_1")))
        .and(body_json(sector.clone()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(node_path("inspection/job/sectors/verify1D_1")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client
        .add_sector("verify1D_1", sector.to_string())
        .await
        .unwrap();
    client.delete_sector("verify1D_1").await.unwrap();
}

#[tokio::test]
async fn test_run_mode_commands() {
    let (server, client) = logged_in().await;

    Mock::given(method("GET"))
        .and(path(node_path("inspection/job/runready")))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(node_path("inspection/job/run")))
        .and(body_json(json!({"name": "GS1_TABLE1"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(node_path("inspection/print")))
        .and(body_json(json!({"enabled": true})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client.is_run_ready().await.unwrap();
    client.run_job("GS1_TABLE1").await.unwrap();
    client.print_enable(true).await.unwrap();
}

#[tokio::test]
async fn test_available_repeats_by_mode() {
    let (server, client) = logged_in().await;

    Mock::given(method("GET"))
        .and(path(node_path("inspection/repeat/available")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([14, 15])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(node_path("inspection/setup/image/available")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([2])))
        .mount(&server)
        .await;

    assert_eq!(client.available_repeats(true).await.unwrap().first(), Some(14));
    assert_eq!(client.available_repeats(false).await.unwrap().first(), Some(2));
}

// ── System ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_devices_and_symbologies() {
    let (server, client) = logged_in().await;

    Mock::given(method("GET"))
        .and(path("/api/printinspection/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nodes": [{"nodeNumber": 1, "cameraMAC": "00:11", "enabled": true}],
            "system": {"version": "2.1"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(node_path("inspection/verify/symbologies")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"symbology": "upcA", "regionType": "verify1D"},
            {"symbology": "dataMatrix", "regionType": "verify2D"}
        ])))
        .mount(&server)
        .await;

    let devices = client.get_devices().await.unwrap();
    assert_eq!(devices.nodes[0].node_number, Some(1));
    assert!(devices.extra.contains_key("system"));

    let symbologies = client.get_symbologies().await.unwrap();
    assert_eq!(symbologies.len(), 2);
    assert_eq!(symbologies[1].region_type, "verify2D");
}
