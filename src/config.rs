//! Gateway configuration
//!
//! Sources, later ones winning:
//! 1. Built-in defaults
//! 2. `config/default.toml` and `config/local.toml` (both optional)
//! 3. `FAASR__SECTION__KEY` environment variables

use std::net::IpAddr;

use serde::Deserialize;

use crate::error::AppError;

/// Minimum length of the session signing secret
const MIN_SESSION_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub github: GitHubConfig,
    pub upload: UploadConfig,
    pub logging: LoggingConfig,
}

/// Listener and public URL settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind, e.g. "0.0.0.0"
    pub host: String,
    pub port: u16,
    /// Public host name, e.g. "faasr.example.com"
    pub domain: String,
    /// "http" or "https"
    pub protocol: String,
    /// Path the V2 endpoints are mounted under, e.g. "/functions/v1"
    pub functions_base_path: String,
    /// Origin of the web frontend allowed to call the API with credentials
    pub frontend_origin: Option<String>,
}

impl ServerConfig {
    /// Public origin of the gateway, e.g. "https://faasr.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Session settings
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC key for session tokens (32+ bytes)
    pub session_secret: String,
}

/// GitHub App configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    /// Numeric GitHub App ID
    pub app_id: u64,
    /// App slug used in the installation URL
    pub app_slug: String,
    /// OAuth client ID of the app
    pub client_id: String,
    /// OAuth client secret of the app
    pub client_secret: String,
    /// PEM-encoded RSA private key of the app
    pub private_key: String,
    /// REST API base (default: https://api.github.com)
    pub api_url: String,
    /// Web base used for OAuth and install URLs (default: https://github.com)
    pub web_url: String,
    /// Owner of the canonical upstream repository
    pub upstream_owner: String,
    /// Name of the canonical upstream repository
    pub upstream_repo: String,
    /// Workflow file that registers uploaded workflows
    pub register_workflow: String,
    /// Directory in the fork that uploaded workflow files are committed to
    pub workflow_dir: String,
    /// Branch that uploads are committed to and the register workflow runs on
    pub default_branch: String,
}

impl GitHubConfig {
    /// Full name of the canonical upstream repository, e.g. "FaaSr/FaaSr-workflow"
    pub fn upstream_full_name(&self) -> String {
        format!("{}/{}", self.upstream_owner, self.upstream_repo)
    }

    /// URL that starts the GitHub App installation flow
    pub fn install_url(&self) -> String {
        format!(
            "{}/apps/{}/installations/new",
            self.web_url.trim_end_matches('/'),
            self.app_slug
        )
    }
}

/// Workflow upload limits
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Largest accepted workflow file in bytes (default: 1 MiB)
    pub max_file_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default level for this crate: trace, debug, info, warn or error
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Build and validate the configuration
    ///
    /// # Errors
    /// `AppError::Config` if a source cannot be read, a value has the wrong
    /// type, or validation fails
    pub fn load() -> Result<Self, AppError> {
        use config::{Config, Environment, File};

        let settings = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.domain", "localhost")?
            .set_default("server.protocol", "http")?
            .set_default("server.functions_base_path", "/functions/v1")?
            .set_default("github.api_url", "https://api.github.com")?
            .set_default("github.web_url", "https://github.com")?
            .set_default("github.upstream_owner", "FaaSr")?
            .set_default("github.upstream_repo", "FaaSr-workflow")?
            .set_default("github.register_workflow", "register-workflow.yml")?
            .set_default("github.workflow_dir", "")?
            .set_default("github.default_branch", "main")?
            .set_default("upload.max_file_bytes", 1024 * 1024)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("FAASR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = settings.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Cookies carry `Secure` unless the gateway runs on a loopback host over http
    pub fn should_use_secure_cookies(&self) -> bool {
        self.server.protocol.eq_ignore_ascii_case("https") || !is_loopback_host(&self.server.domain)
    }

    pub(crate) fn validate(&self) -> Result<(), AppError> {
        if self.auth.session_secret.len() < MIN_SESSION_SECRET_BYTES {
            return Err(invalid(format!(
                "auth.session_secret needs at least {MIN_SESSION_SECRET_BYTES} bytes"
            )));
        }

        if !self.server.functions_base_path.starts_with('/') {
            return Err(invalid("server.functions_base_path must start with '/'"));
        }

        let required = [
            ("github.client_id", &self.github.client_id),
            ("github.client_secret", &self.github.client_secret),
            ("github.app_slug", &self.github.app_slug),
            ("github.upstream_owner", &self.github.upstream_owner),
            ("github.upstream_repo", &self.github.upstream_repo),
        ];
        if let Some((key, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(invalid(format!("{key} is required")));
        }

        if self.upload.max_file_bytes == 0 {
            return Err(invalid("upload.max_file_bytes must be positive"));
        }

        let https = self.server.protocol.eq_ignore_ascii_case("https");
        match (https, is_loopback_host(&self.server.domain)) {
            (true, _) => Ok(()),
            (false, true) => {
                tracing::warn!(
                    domain = %self.server.domain,
                    "Session cookies are sent without Secure on a loopback host"
                );
                Ok(())
            }
            (false, false) => Err(invalid(
                "server.protocol must be https when server.domain is not a loopback host",
            )),
        }
    }
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::Config(message.into())
}

/// Host part of `server.domain`, lowercased and without a trailing dot
fn host_of(domain: &str) -> String {
    let domain = domain.trim();
    let host = url::Url::parse(&format!("http://{domain}"))
        .ok()
        .and_then(|url| url.host_str().map(str::to_owned))
        .unwrap_or_else(|| domain.to_owned());

    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_loopback_host(domain: &str) -> bool {
    let host = host_of(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    // IPv6 literals keep their brackets in host_str
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok_and(|ip| ip.is_loopback() || ip.is_unspecified())
}
