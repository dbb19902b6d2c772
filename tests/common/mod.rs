//! Common test utilities for E2E tests
//!
//! Every `TestServer` talks to its own `wiremock` server standing in for
//! both github.com and api.github.com.

#![allow(dead_code)]

use std::sync::OnceLock;

use faasr_gateway::auth::{Session, SessionIdentity, token};
use faasr_gateway::{AppState, config};
use serde_json::json;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SESSION_SECRET: &str = "test-session-secret-with-32-bytes!!";
pub const FORK_OWNER: &str = "octocat";
pub const INSTALLATION_ID: u64 = 4242;

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub github: MockServer,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        let github = MockServer::start().await;

        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                domain: "localhost".to_string(),
                protocol: "http".to_string(),
                functions_base_path: "/functions/v1".to_string(),
                frontend_origin: None,
            },
            auth: config::AuthConfig {
                session_secret: SESSION_SECRET.to_string(),
            },
            github: config::GitHubConfig {
                app_id: 1234,
                app_slug: "faasr-test".to_string(),
                client_id: "test-client-id".to_string(),
                client_secret: "test-client-secret".to_string(),
                private_key: test_private_key().to_string(),
                api_url: github.uri(),
                web_url: github.uri(),
                upstream_owner: "FaaSr".to_string(),
                upstream_repo: "FaaSr-workflow".to_string(),
                register_workflow: "register-workflow.yml".to_string(),
                workflow_dir: String::new(),
                default_branch: "main".to_string(),
            },
            upload: config::UploadConfig {
                max_file_bytes: 1024 * 1024,
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        faasr_gateway::metrics::init_metrics();

        // Initialize app state
        let state = AppState::new(config).unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = faasr_gateway::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            github,
            client,
        }
    }

    /// Get URL for a path relative to the server root
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Get URL for a V2 endpoint under the functions base path
    pub fn function_url(&self, endpoint: &str) -> String {
        format!("{}/functions/v1/{}", self.addr, endpoint)
    }

    /// Sign a session for `octocat` on the fork `FaaSr-workflow`
    pub fn create_session_token(&self) -> String {
        let session = Session::issue(
            SessionIdentity {
                installation_id: INSTALLATION_ID.to_string(),
                gh_user_login: FORK_OWNER.to_string(),
                gh_user_id: 583231,
                gh_repo_name: "FaaSr-workflow".to_string(),
                gh_avatar_url: Some("https://avatars.githubusercontent.com/u/583231".to_string()),
            },
            chrono::Utc::now().timestamp(),
        );

        token::sign(&session, SESSION_SECRET).expect("Failed to create test token")
    }

    pub fn session_cookie(&self) -> String {
        format!("faasr_session_v2={}", self.create_session_token())
    }

    /// Mock the OAuth code exchange and the user profile
    pub async fn mock_oauth_user(&self) {
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ghu_user_token",
                "token_type": "bearer",
                "scope": "",
            })))
            .mount(&self.github)
            .await;

        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "login": FORK_OWNER,
                "id": 583231,
                "avatar_url": "https://avatars.githubusercontent.com/u/583231",
            })))
            .mount(&self.github)
            .await;
    }

    /// Mock one installation holding the given repository
    pub async fn mock_installation(
        &self,
        permissions: serde_json::Value,
        repo_name: &str,
        fork_parent: Option<&str>,
    ) {
        Mock::given(method("GET"))
            .and(path("/user/installations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 1,
                "installations": [{
                    "id": INSTALLATION_ID,
                    "account": { "login": FORK_OWNER },
                    "permissions": permissions,
                }],
            })))
            .mount(&self.github)
            .await;

        let full_name = format!("{FORK_OWNER}/{repo_name}");
        Mock::given(method("GET"))
            .and(path(format!("/user/installations/{INSTALLATION_ID}/repositories")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 1,
                "repositories": [{
                    "name": repo_name,
                    "full_name": full_name,
                    "fork": fork_parent.is_some(),
                }],
            })))
            .mount(&self.github)
            .await;

        if let Some(parent) = fork_parent {
            Mock::given(method("GET"))
                .and(path(format!("/repos/{full_name}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "full_name": full_name,
                    "fork": true,
                    "parent": { "full_name": parent },
                })))
                .mount(&self.github)
                .await;
        }
    }

    /// Mock minting an installation access token
    pub async fn mock_installation_token(&self) {
        Mock::given(method("POST"))
            .and(path(format!("/app/installations/{INSTALLATION_ID}/access_tokens")))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "token": "ghs_installation_token",
                "expires_at": "2099-01-01T00:00:00Z",
            })))
            .mount(&self.github)
            .await;
    }

    /// Mock the register workflow's dispatch run list
    pub async fn mock_dispatch_runs(&self, runs: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(format!(
                "/repos/{FORK_OWNER}/FaaSr-workflow/actions/workflows/register-workflow.yml/runs"
            )))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": runs.as_array().map(Vec::len).unwrap_or(0),
                "workflow_runs": runs,
            })))
            .mount(&self.github)
            .await;
    }
}

/// Permissions the gateway requires on the fork
pub fn full_permissions() -> serde_json::Value {
    json!({ "contents": "write", "workflows": "write", "metadata": "read" })
}

/// A dispatch run in the shape of the GitHub Actions API
pub fn workflow_run(
    id: u64,
    file_name: &str,
    status: &str,
    conclusion: Option<&str>,
) -> serde_json::Value {
    let now = chrono::Utc::now().to_rfc3339();
    json!({
        "id": id,
        "html_url": format!("https://github.com/{FORK_OWNER}/FaaSr-workflow/actions/runs/{id}"),
        "status": status,
        "conclusion": conclusion,
        "display_title": format!("Register {file_name}"),
        "event": "workflow_dispatch",
        "created_at": now,
        "updated_at": now,
    })
}

/// Extract the `name=value` pair of the session cookie from a response
pub fn session_cookie_from(response: &reqwest::Response) -> Option<String> {
    set_cookie_header(response)
        .and_then(|header| header.split(';').next().map(str::to_string))
        .filter(|pair| pair.starts_with("faasr_session_v2="))
}

pub fn set_cookie_header(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get("set-cookie")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// RSA key for app JWTs, generated once per test binary
fn test_private_key() -> &'static str {
    static KEY: OnceLock<String> = OnceLock::new();
    KEY.get_or_init(|| {
        use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};

        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("generate key");
        key.to_pkcs1_pem(LineEnding::LF).expect("encode key").to_string()
    })
}
