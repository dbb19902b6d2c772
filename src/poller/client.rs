//! Calls the workflow endpoints on behalf of a signed-in user

use async_trait::async_trait;
use reqwest::{StatusCode, header, multipart};

use crate::api::{RegistrationDescriptor, UploadWorkflowResponse};
use crate::auth::SESSION_COOKIE_NAME;
use crate::error::FailureBody;

/// Errors from the workflow endpoints
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ApiError {
    /// The registration run does not exist yet
    #[error("Registration run not found yet")]
    NotFound,

    /// The gateway answered with a failure body
    #[error("{message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Request(err.to_string())
    }
}

/// Workflow endpoints as seen by the poller
#[async_trait]
pub trait WorkflowsApi: Send + Sync {
    /// POST workflows-v2
    async fn upload(
        &self,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<UploadWorkflowResponse, ApiError>;

    /// GET workflows-v2?filename=
    async fn registration_status(&self, file_name: &str)
    -> Result<RegistrationDescriptor, ApiError>;
}

/// reqwest implementation carrying the session cookie
#[derive(Clone)]
pub struct HttpWorkflowsApi {
    http: reqwest::Client,
    endpoint: String,
    cookie: String,
}

impl HttpWorkflowsApi {
    /// # Arguments
    /// * `functions_url` - Public URL of the functions base path, e.g.
    ///   `https://faasr.example.com/functions/v1`
    /// * `session_token` - Value of the session cookie
    pub fn new(http: reqwest::Client, functions_url: &str, session_token: &str) -> Self {
        Self {
            http,
            endpoint: format!("{}/workflows-v2", functions_url.trim_end_matches('/')),
            cookie: format!("{SESSION_COOKIE_NAME}={session_token}"),
        }
    }
}

impl std::fmt::Debug for HttpWorkflowsApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpWorkflowsApi")
            .field("endpoint", &self.endpoint)
            .field("cookie", &"[redacted]")
            .finish()
    }
}

#[async_trait]
impl WorkflowsApi for HttpWorkflowsApi {
    #[tracing::instrument(skip(self, content), fields(bytes = content.len()))]
    async fn upload(
        &self,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<UploadWorkflowResponse, ApiError> {
        let part = multipart::Part::bytes(content)
            .file_name(file_name.to_string())
            .mime_str("application/json")?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(&self.endpoint)
            .header(header::COOKIE, &self.cookie)
            .multipart(form)
            .send()
            .await?;

        read_json(response).await
    }

    #[tracing::instrument(skip(self))]
    async fn registration_status(
        &self,
        file_name: &str,
    ) -> Result<RegistrationDescriptor, ApiError> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("filename", file_name)])
            .header(header::COOKIE, &self.cookie)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }

        read_json(response).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(match serde_json::from_str::<FailureBody>(&body) {
            Ok(failure) => ApiError::Rejected {
                status: status.as_u16(),
                code: failure.error,
                message: failure.message,
            },
            Err(_) => ApiError::Rejected {
                status: status.as_u16(),
                code: "http_error".to_string(),
                message: format!("Request failed with status {status}"),
            },
        });
    }

    serde_json::from_str(&body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
}
