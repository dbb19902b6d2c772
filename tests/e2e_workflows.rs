//! E2E tests for workflow upload, registration status and the poller

mod common;

use std::sync::Arc;

use common::{FORK_OWNER, TestServer, workflow_run};
use faasr_gateway::poller::{
    HttpWorkflowsApi, PollerHandle, RegistrationPhase, UploadStatus,
};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

const CONTENTS_PATH: &str = "/repos/octocat/FaaSr-workflow/contents/flow.json";
const DISPATCH_PATH: &str =
    "/repos/octocat/FaaSr-workflow/actions/workflows/register-workflow.yml/dispatches";

fn workflow_form(file_name: &str, content: &'static [u8]) -> reqwest::multipart::Form {
    let part = reqwest::multipart::Part::bytes(content)
        .file_name(file_name.to_string())
        .mime_str("application/json")
        .unwrap();
    reqwest::multipart::Form::new().part("file", part)
}

/// Mock contents lookup (file absent), commit and dispatch
async fn mock_commit_and_dispatch(server: &TestServer) {
    Mock::given(method("GET"))
        .and(path(CONTENTS_PATH))
        .and(query_param("ref", "main"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
        .mount(&server.github)
        .await;

    Mock::given(method("PUT"))
        .and(path(CONTENTS_PATH))
        .and(body_partial_json(json!({
            "message": "Add workflow flow.json",
            "branch": "main",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "content": { "name": "flow.json", "sha": "blob-sha" },
            "commit": { "sha": "commit-sha-1" },
        })))
        .expect(1)
        .mount(&server.github)
        .await;

    Mock::given(method("POST"))
        .and(path(DISPATCH_PATH))
        .and(body_partial_json(json!({
            "ref": "main",
            "inputs": { "workflow_file": "flow.json" },
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server.github)
        .await;
}

#[tokio::test]
async fn test_upload_requires_session() {
    let server = TestServer::new().await;

    let response = server
        .client
        .post(server.function_url("workflows-v2"))
        .multipart(workflow_form("flow.json", b"{}"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_upload_commits_and_dispatches() {
    let server = TestServer::new().await;
    server.mock_installation_token().await;
    mock_commit_and_dispatch(&server).await;
    server
        .mock_dispatch_runs(json!([workflow_run(77, "flow.json", "queued", None)]))
        .await;

    let response = server
        .client
        .post(server.function_url("workflows-v2"))
        .header("cookie", server.session_cookie())
        .multipart(workflow_form("flow.json", br#"{"FunctionList": {}}"#))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["fileName"], "flow.json");
    assert_eq!(body["commitSha"], "commit-sha-1");
    assert_eq!(body["workflowRunId"], 77);
    assert_eq!(
        body["workflowRunUrl"],
        format!("https://github.com/{FORK_OWNER}/FaaSr-workflow/actions/runs/77")
    );
}

#[tokio::test]
async fn test_upload_before_run_exists() {
    let server = TestServer::new().await;
    server.mock_installation_token().await;
    mock_commit_and_dispatch(&server).await;
    server.mock_dispatch_runs(json!([])).await;

    let response = server
        .client
        .post(server.function_url("workflows-v2"))
        .header("cookie", server.session_cookie())
        .multipart(workflow_form("flow.json", b"{}"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["commitSha"], "commit-sha-1");
    assert!(body["workflowRunId"].is_null());
    assert!(body["workflowRunUrl"].is_null());
}

#[tokio::test]
async fn test_upload_rejects_non_json_file() {
    let server = TestServer::new().await;

    let response = server
        .client
        .post(server.function_url("workflows-v2"))
        .header("cookie", server.session_cookie())
        .multipart(workflow_form("flow.yaml", b"{}"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "invalid_file");
}

#[tokio::test]
async fn test_upload_rejects_invalid_json() {
    let server = TestServer::new().await;

    let response = server
        .client
        .post(server.function_url("workflows-v2"))
        .header("cookie", server.session_cookie())
        .multipart(workflow_form("flow.json", b"{not json"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_file");
}

#[tokio::test]
async fn test_upload_surfaces_github_failure() {
    let server = TestServer::new().await;
    Mock::given(method("POST"))
        .and(path(format!(
            "/app/installations/{}/access_tokens",
            common::INSTALLATION_ID
        )))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })),
        )
        .mount(&server.github)
        .await;

    let response = server
        .client
        .post(server.function_url("workflows-v2"))
        .header("cookie", server.session_cookie())
        .multipart(workflow_form("flow.json", b"{}"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "github_error");
}

#[tokio::test]
async fn test_registration_status_maps_completed_run() {
    let server = TestServer::new().await;
    server.mock_installation_token().await;
    server
        .mock_dispatch_runs(json!([
            workflow_run(90, "other.json", "in_progress", None),
            workflow_run(91, "flow.json", "completed", Some("success")),
        ]))
        .await;

    let response = server
        .client
        .get(server.function_url("workflows-v2?filename=flow.json"))
        .header("cookie", server.session_cookie())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["fileName"], "flow.json");
    assert_eq!(body["status"], "success");
    assert_eq!(
        body["workflowRunUrl"],
        format!("https://github.com/{FORK_OWNER}/FaaSr-workflow/actions/runs/91")
    );
    assert!(body["completedAt"].is_string());
}

#[tokio::test]
async fn test_registration_status_not_found_until_run_exists() {
    let server = TestServer::new().await;
    server.mock_installation_token().await;
    server
        .mock_dispatch_runs(json!([workflow_run(90, "other.json", "queued", None)]))
        .await;

    let response = server
        .client
        .get(server.function_url("workflows-v2?filename=flow.json"))
        .header("cookie", server.session_cookie())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_poller_drives_upload_to_success() {
    let server = TestServer::new().await;
    server.mock_installation_token().await;
    mock_commit_and_dispatch(&server).await;
    server
        .mock_dispatch_runs(json!([workflow_run(
            101,
            "flow.json",
            "completed",
            Some("success")
        )]))
        .await;

    let api = HttpWorkflowsApi::new(
        server.client.clone(),
        &server.function_url(""),
        &server.create_session_token(),
    );
    let mut handle = PollerHandle::new(Arc::new(api));
    let mut rx = handle.subscribe();

    handle
        .upload("flow.json".to_string(), b"{}".to_vec())
        .unwrap();
    let state = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        rx.wait_for(|state| state.registration_status.is_terminal()),
    )
    .await
    .expect("poller settles")
    .unwrap()
    .clone();

    assert_eq!(state.upload_status, UploadStatus::Uploaded);
    assert_eq!(state.registration_status, RegistrationPhase::Success);
    assert_eq!(state.uploaded_file.unwrap().commit_sha, "commit-sha-1");
    assert_eq!(state.registration.unwrap().file_name, "flow.json");
}
