//! ApiClient tests against a wiremock application API.

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use berth_harness::{ApiClient, ClientError};
use berth_provision::TargetId;

#[tokio::test]
async fn get_sends_api_key_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/Spaces-2/projects"))
        .and(header("X-Octopus-ApiKey", "API-TEST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Items": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri(), "API-TEST")
        .unwrap()
        .for_workspace(TargetId::new("Spaces-2"));
    let body: serde_json::Value = client
        .get_json(&client.workspace_path("projects"))
        .await
        .unwrap();

    assert_eq!(body["Items"], json!([]));
}

#[tokio::test]
async fn post_sends_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/Spaces-1/projects"))
        .and(body_json(json!({ "Name": "Test" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "Id": "Projects-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri(), "API-TEST").unwrap();
    let created: serde_json::Value = client
        .post_json("/api/Spaces-1/projects", &json!({ "Name": "Test" }))
        .await
        .unwrap();

    assert_eq!(created["Id"], "Projects-1");
}

#[tokio::test]
async fn error_status_is_reported_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid API key"))
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri(), "API-WRONG").unwrap();
    let err = client
        .get_json::<serde_json::Value>("/api")
        .await
        .unwrap_err();

    match err {
        ClientError::Status { status, body, .. } => {
            assert_eq!(status, 401);
            assert_eq!(body, "Invalid API key");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn non_json_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri(), "API-TEST").unwrap();
    let err = client
        .get_json::<serde_json::Value>("/")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Decode { .. }));
}

#[tokio::test]
async fn unreachable_server_is_a_request_error() {
    let client = ApiClient::new("http://127.0.0.1:1", "API-TEST").unwrap();
    let err = client
        .get_json::<serde_json::Value>("/api")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Request { .. }));
}
