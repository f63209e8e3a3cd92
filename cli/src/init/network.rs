//! One method per backend call used during init. No retries here; the
//! controller owns the retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use requirements_mcp_core::jsonrpc::JSONRPC_VERSION;
use requirements_mcp_core::redact::mask_sensitive;
use requirements_mcp_core::secure::SecureString;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use crate::init::error::InitError;
use crate::init::tls::{TlsSettings, hardened_client};

pub const READY_PATH: &str = "ready";
pub const LOGIN_PATH: &str = "auth/login";
pub const PATS_PATH: &str = "api/v1/pats";
pub const MCP_PATH: &str = "api/v1/mcp";

pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";
pub const INIT_CLIENT_NAME: &str = "mcp-init-client";
pub const INIT_CLIENT_VERSION: &str = "1.0.0";
pub const PAT_SCOPE: &str = "full_access";
pub const PAT_LIFETIME_DAYS: i64 = 365;

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
    #[serde(default)]
    expires_at: Option<String>,
    user: UserInfo,
}

/// A successful login. The JWT is already in a wipeable buffer.
pub struct LoginSession {
    pub token: SecureString,
    pub expires_at: Option<String>,
    pub user: UserInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatRequest {
    pub name: String,
    pub expires_at: String,
    pub scopes: Vec<String>,
}

impl PatRequest {
    /// `MCP Server - <host> - <YYYY-MM-DD>`, valid for a year.
    pub fn for_host(host: &str, now: DateTime<Utc>) -> Self {
        Self {
            name: format!("MCP Server - {host} - {}", now.format("%Y-%m-%d")),
            expires_at: (now + chrono::Duration::days(PAT_LIFETIME_DAYS)).to_rfc3339(),
            scopes: vec![PAT_SCOPE.to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatInfo {
    pub id: String,
    pub name: String,
    pub expires_at: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Deserialize)]
struct PatResponse {
    token: String,
    pat: PatInfo,
}

pub struct PatCreated {
    pub token: SecureString,
    pub pat: PatInfo,
}

/// Local host name for PAT naming.
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// Parse a user-typed backend URL: http or https with a host.
pub fn parse_backend_url(raw: &str) -> Result<Url, InitError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(InitError::user_input("backend URL must not be empty"));
    }
    let url = Url::parse(raw).map_err(|e| {
        InitError::user_input(format!("'{}' is not a valid URL", mask_sensitive(raw)))
            .with_cause(e)
            .with_guidance("Enter a full URL such as https://api.example.com")
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(InitError::user_input(format!(
            "unsupported URL scheme '{}'; use http or https",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(InitError::user_input(format!(
            "'{}' has no host",
            mask_sensitive(raw)
        )));
    }
    Ok(url)
}

fn join(base: &Url, path: &str) -> Result<Url, InitError> {
    let joined = format!("{}/{path}", base.as_str().trim_end_matches('/'));
    Url::parse(&joined).map_err(|e| {
        InitError::validation(format!("invalid endpoint {}", mask_sensitive(&joined))).with_cause(e)
    })
}

fn transport_error(err: reqwest::Error, base: &Url) -> InitError {
    let base = mask_sensitive(base.as_str());
    let message = if err.is_timeout() {
        format!("request to {base} timed out")
    } else if err.is_connect() {
        format!("could not connect to {base}")
    } else {
        format!("request to {base} failed")
    };
    InitError::network(message).with_cause(err)
}

/// GET `{base}/ready`; only 200 counts as ready.
pub async fn check_connectivity(base: &Url, timeout: Duration) -> Result<(), InitError> {
    let http = reqwest::Client::builder()
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .timeout(timeout)
        .build()
        .map_err(|e| InitError::network("failed to build HTTP client").with_cause(e))?;
    let url = join(base, READY_PATH)?;
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| transport_error(e, base))?;
    match response.status() {
        StatusCode::OK => Ok(()),
        status => Err(InitError::network(format!(
            "backend is not ready (GET /ready returned {})",
            status.as_u16()
        ))),
    }
}

/// Client for the credentialed init calls. Construction runs the HTTPS guard.
pub struct InitClient {
    http: reqwest::Client,
    base: Url,
}

impl InitClient {
    pub fn new(base: Url, tls: &TlsSettings, connect_timeout: Duration) -> Result<Self, InitError> {
        Ok(Self {
            http: hardened_client(tls, connect_timeout)?,
            base,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub async fn login(
        &self,
        username: &SecureString,
        password: &SecureString,
        timeout: Duration,
    ) -> Result<LoginSession, InitError> {
        let response = self
            .http
            .post(join(&self.base, LOGIN_PATH)?)
            .timeout(timeout)
            .json(&json!({
                "username": username.expose(),
                "password": password.expose(),
            }))
            .send()
            .await
            .map_err(|e| transport_error(e, &self.base))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => {
                return Err(InitError::auth("invalid username or password"));
            }
            status => {
                return Err(InitError::auth(format!(
                    "login failed with status {}",
                    status.as_u16()
                )));
            }
        }

        let body: LoginResponse = response.json().await.map_err(|e| {
            InitError::auth("login response was not understood").with_cause(e)
        })?;
        Ok(LoginSession {
            token: SecureString::from(body.token),
            expires_at: body.expires_at,
            user: body.user,
        })
    }

    pub async fn create_pat(
        &self,
        jwt: &SecureString,
        request: &PatRequest,
        timeout: Duration,
    ) -> Result<PatCreated, InitError> {
        let response = self
            .http
            .post(join(&self.base, PATS_PATH)?)
            .timeout(timeout)
            .header(AUTHORIZATION, format!("Bearer {}", jwt.expose()))
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error(e, &self.base))?;

        match response.status() {
            StatusCode::CREATED => {}
            StatusCode::UNAUTHORIZED => {
                return Err(InitError::auth("session rejected while creating the access token")
                    .fatal()
                    .with_guidance("Run the initialization again to log in with a fresh session"));
            }
            status => {
                return Err(InitError::auth(format!(
                    "PAT creation failed with status {}",
                    status.as_u16()
                )));
            }
        }

        let body: PatResponse = response.json().await.map_err(|e| {
            InitError::auth("PAT response was not understood").with_cause(e)
        })?;
        Ok(PatCreated {
            token: SecureString::from(body.token),
            pat: body.pat,
        })
    }

    /// MCP `initialize` against the backend with the new PAT. Returns the
    /// `result` object.
    pub async fn validate_pat(&self, pat: &SecureString, timeout: Duration) -> Result<Value, InitError> {
        let request = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": INIT_CLIENT_NAME,
                    "version": INIT_CLIENT_VERSION,
                },
            },
        });
        let response = self
            .http
            .post(join(&self.base, MCP_PATH)?)
            .timeout(timeout)
            .header(AUTHORIZATION, format!("Bearer {}", pat.expose()))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, &self.base))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => {
                return Err(InitError::validation(
                    "PAT validation failed: invalid or expired token",
                ));
            }
            status => {
                return Err(InitError::validation(format!(
                    "PAT validation failed with status {}",
                    status.as_u16()
                )));
            }
        }

        let mut body: Value = response.json().await.map_err(|e| {
            InitError::validation("initialize response was not JSON").with_cause(e)
        })?;
        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(InitError::validation(format!(
                "initialize returned an error: {}",
                mask_sensitive(message)
            )));
        }
        match body.get_mut("result").map(Value::take) {
            Some(result @ Value::Object(_)) => Ok(result),
            _ => Err(InitError::validation(
                "initialize response has no result object",
            )),
        }
    }
}
