//! The init state machine: backend URL, connectivity, login, PAT minting,
//! config write and a final round-trip through the new PAT.

use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use requirements_mcp_core::secure::{SecretId, SecretStore, SecureString};
use url::Url;
use zeroize::Zeroize;

use crate::init::error::InitError;
use crate::init::files::{ConfigFileManager, generate_config};
use crate::init::network::{
    InitClient, LoginSession, PatCreated, PatRequest, check_connectivity, local_hostname,
    parse_backend_url,
};
use crate::init::progress::{ProgressTracker, Step};
use crate::init::prompt::Prompter;
use crate::init::retry::{CONNECTIVITY_TIMEOUT, REQUEST_TIMEOUT, RetryPolicy, retrying};
use crate::init::tls::{TlsSettings, plain_http_warning};

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct InitOutcome {
    pub config_path: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub backend_url: Url,
    pub username: String,
    pub pat_name: String,
    pub pat_expires_at: String,
}

pub struct InitController<P> {
    prompter: P,
    policy: RetryPolicy,
    tls: TlsSettings,
    progress: ProgressTracker,
    secrets: SecretStore,
    hostname: String,
}

impl<P: Prompter> InitController<P> {
    pub fn new(prompter: P) -> Self {
        Self {
            prompter,
            policy: RetryPolicy::default(),
            tls: TlsSettings::default(),
            progress: ProgressTracker::new(false),
            secrets: SecretStore::new(),
            hostname: local_hostname(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = tls;
        self
    }

    /// Spinner and per-step status lines on stderr.
    pub fn with_progress_output(mut self, enabled: bool) -> Self {
        self.progress = ProgressTracker::new(enabled);
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn secrets(&self) -> &SecretStore {
        &self.secrets
    }

    pub fn prompter(&self) -> &P {
        &self.prompter
    }

    /// Run every step. Captured secrets are wiped before this returns,
    /// whatever the outcome.
    pub async fn run(&mut self, config_path: &Path) -> Result<InitOutcome, InitError> {
        let result = self.run_steps(config_path).await;
        self.secrets.wipe_all();
        tracing::debug!(
            secrets = self.secrets.len(),
            ok = result.is_ok(),
            "init finished, secrets wiped"
        );
        result
    }

    async fn run_steps(&mut self, config_path: &Path) -> Result<InitOutcome, InitError> {
        let files = ConfigFileManager::new(config_path)?;
        self.prompter.message(&format!(
            "Setting up the requirements MCP server. Configuration will be written to {}",
            files.path().display()
        ));

        let base = self.collect_backend_url().await?;
        if let Some(warning) = plain_http_warning(&base) {
            self.prompter.message(&format!("warning: {warning}"));
        }

        // HTTPS guard: nothing secret is prompted for until this passes.
        let client = InitClient::new(base.clone(), &self.tls, CONNECTIVITY_TIMEOUT)?;

        let credentials = self.collect_credentials().await?;
        let (session, credentials) = self.authenticate(&client, credentials).await?;
        let username = session.user.username.clone();
        let jwt = self.secrets.register(session.token);
        self.secrets.wipe(credentials.1);
        tracing::debug!(user = %username, "authenticated");

        let created = self.generate_pat(&client, jwt).await?;
        let pat_info = created.pat;
        let pat = self.secrets.register(created.token);
        self.secrets.wipe(jwt);

        let backup_path = self.handle_existing_config(&files)?;
        self.write_config(&files, &base, pat).await?;
        self.validate_config(&client, pat).await?;

        Ok(InitOutcome {
            config_path: files.path().to_path_buf(),
            backup_path,
            backend_url: base,
            username,
            pat_name: pat_info.name,
            pat_expires_at: pat_info.expires_at,
        })
    }

    /// Prompt for a URL, probe it, and re-prompt when the probe keeps
    /// failing and the user wants to try another one.
    async fn collect_backend_url(&mut self) -> Result<Url, InitError> {
        let max_rounds = self.policy.max_attempts(Step::UrlCollection);
        let timeout = self
            .policy
            .timeout(Step::ConnectivityTest)
            .unwrap_or(CONNECTIVITY_TIMEOUT);
        let mut round = 1;
        loop {
            let prompter = &mut self.prompter;
            let url = retrying(
                &self.policy,
                &mut self.progress,
                Step::UrlCollection,
                async |_| {
                    let raw = prompter.input("Backend API URL")?;
                    parse_backend_url(&raw)
                },
            )
            .await?;

            let probe = retrying(
                &self.policy,
                &mut self.progress,
                Step::ConnectivityTest,
                async |_| check_connectivity(&url, timeout).await,
            )
            .await;

            match probe {
                Ok(()) => return Ok(url),
                Err(err) if !err.retryable || round >= max_rounds => return Err(err),
                Err(err) => {
                    self.prompter.message(&err.render());
                    if !self.prompter.confirm("Try a different backend URL?", true)? {
                        return Err(InitError::cancelled());
                    }
                    round += 1;
                }
            }
        }
    }

    async fn collect_credentials(&mut self) -> Result<(SecretId, SecretId), InitError> {
        let prompter = &mut self.prompter;
        let secrets = &mut self.secrets;
        retrying(
            &self.policy,
            &mut self.progress,
            Step::CredentialCollection,
            async |_| read_credentials(prompter, secrets),
        )
        .await
    }

    /// Log in; every retry asks for the credentials again. Returns the session
    /// and the ids of the credentials that worked.
    async fn authenticate(
        &mut self,
        client: &InitClient,
        first: (SecretId, SecretId),
    ) -> Result<(LoginSession, (SecretId, SecretId)), InitError> {
        let timeout = self
            .policy
            .timeout(Step::Authentication)
            .unwrap_or(REQUEST_TIMEOUT);
        let reprompts = self.policy.max_attempts(Step::CredentialCollection);
        let prompter = &mut self.prompter;
        let secrets = &mut self.secrets;
        let spinner = self.progress.spinner();
        let mut current = first;

        let session = retrying(
            &self.policy,
            &mut self.progress,
            Step::Authentication,
            async |attempt| {
                if attempt > 1 {
                    secrets.wipe(current.0);
                    secrets.wipe(current.1);
                    current = spinner.suspend(|| {
                        prompter.message("Please enter your credentials again.");
                        read_credentials_within(prompter, secrets, reprompts)
                    })?;
                }
                let username = stored(secrets, current.0)?;
                let password = stored(secrets, current.1)?;
                client.login(username, password, timeout).await
            },
        )
        .await?;
        Ok((session, current))
    }

    async fn generate_pat(
        &mut self,
        client: &InitClient,
        jwt: SecretId,
    ) -> Result<PatCreated, InitError> {
        let timeout = self
            .policy
            .timeout(Step::PatGeneration)
            .unwrap_or(REQUEST_TIMEOUT);
        let request = PatRequest::for_host(&self.hostname, Utc::now());
        tracing::debug!(name = %request.name, expires_at = %request.expires_at, "requesting PAT");
        let secrets = &self.secrets;
        retrying(
            &self.policy,
            &mut self.progress,
            Step::PatGeneration,
            async |_| {
                let jwt = stored(secrets, jwt)?;
                client.create_pat(jwt, &request, timeout).await
            },
        )
        .await
    }

    /// Confirm before replacing an existing file; back it up on a best-effort
    /// basis.
    fn handle_existing_config(
        &mut self,
        files: &ConfigFileManager,
    ) -> Result<Option<PathBuf>, InitError> {
        if !files.exists() {
            return Ok(None);
        }
        let overwrite = self.prompter.confirm(
            &format!(
                "A configuration already exists at {}. Overwrite it?",
                files.path().display()
            ),
            false,
        )?;
        if !overwrite {
            return Err(InitError::cancelled()
                .with_guidance("The existing configuration was left unchanged"));
        }

        match files.backup(Local::now()) {
            Ok(path) => {
                self.prompter.message(&format!(
                    "Existing configuration backed up to {}",
                    path.display()
                ));
                Ok(Some(path))
            }
            Err(err) => {
                tracing::warn!(error = %err, "config backup failed, continuing");
                self.prompter
                    .message(&format!("warning: could not back up existing configuration: {err}"));
                Ok(None)
            }
        }
    }

    async fn write_config(
        &mut self,
        files: &ConfigFileManager,
        base: &Url,
        pat: SecretId,
    ) -> Result<(), InitError> {
        let mut doc = generate_config(base, stored(&self.secrets, pat)?)?;
        let written = retrying(
            &self.policy,
            &mut self.progress,
            Step::ConfigWrite,
            async |_| files.write(&doc),
        )
        .await;
        doc.pat_token.zeroize();
        written
    }

    async fn validate_config(&mut self, client: &InitClient, pat: SecretId) -> Result<(), InitError> {
        let timeout = self
            .policy
            .timeout(Step::ConfigValidation)
            .unwrap_or(REQUEST_TIMEOUT);
        let secrets = &self.secrets;
        let result = retrying(
            &self.policy,
            &mut self.progress,
            Step::ConfigValidation,
            async |_| client.validate_pat(stored(secrets, pat)?, timeout).await,
        )
        .await?;
        tracing::debug!(server = ?result.get("serverInfo"), "initialize succeeded");
        Ok(())
    }
}

fn stored(secrets: &SecretStore, id: SecretId) -> Result<&SecureString, InitError> {
    secrets
        .get(id)
        .filter(|secret| !secret.is_empty())
        .ok_or_else(|| InitError::user_input("credential is no longer available").fatal())
}

/// One round of username + password. Plain copies are wiped once captured.
fn read_credentials<P: Prompter>(
    prompter: &mut P,
    secrets: &mut SecretStore,
) -> Result<(SecretId, SecretId), InitError> {
    let mut raw = prompter.input("Username")?;
    let mut username = raw.trim().to_string();
    raw.zeroize();
    if username.is_empty() {
        return Err(InitError::user_input("username must not be empty"));
    }
    let username = secrets.register(SecureString::capture(&mut username));

    let mut password = prompter.password("Password")?;
    if password.is_empty() {
        secrets.wipe(username);
        return Err(InitError::user_input("password must not be empty"));
    }
    let password = secrets.register(SecureString::capture(&mut password));
    Ok((username, password))
}

fn read_credentials_within<P: Prompter>(
    prompter: &mut P,
    secrets: &mut SecretStore,
    attempts: u32,
) -> Result<(SecretId, SecretId), InitError> {
    let mut last = None;
    for _ in 0..attempts {
        match read_credentials(prompter, secrets) {
            Ok(ids) => return Ok(ids),
            Err(err) if err.retryable => {
                prompter.message(&err.render());
                last = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last
        .unwrap_or_else(|| InitError::user_input("no credentials entered"))
        .fatal())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::error::ErrorCategory;
    use crate::init::progress::StepStatus;
    use crate::init::prompt::ScriptedPrompter;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use requirements_mcp_core::config::ConfigDocument;
    use serde_json::{Value, json};
    use std::time::Duration;

    fn bearer(headers: &HeaderMap) -> Option<&str> {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }

    /// Login accepts alice/s3cret, PAT creation mints `pat_xyz`, and the MCP
    /// endpoint accepts `accepted_pat`.
    fn fake_backend(accepted_pat: &'static str) -> Router {
        Router::new()
            .route("/ready", get(|| async { "ready" }))
            .route(
                "/auth/login",
                post(|Json(body): Json<Value>| async move {
                    if body == json!({"username": "alice", "password": "s3cret"}) {
                        (
                            StatusCode::OK,
                            Json(json!({
                                "token": "jwt-abc",
                                "expires_at": "2030-01-01T00:00:00Z",
                                "user": {"id": "u-1", "username": "alice", "email": "alice@example.com", "role": "user"}
                            })),
                        )
                    } else {
                        (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid credentials"})))
                    }
                }),
            )
            .route(
                "/api/v1/pats",
                post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                    if bearer(&headers) != Some("jwt-abc") {
                        return (StatusCode::UNAUTHORIZED, Json(json!({})));
                    }
                    (
                        StatusCode::CREATED,
                        Json(json!({
                            "token": "pat_xyz",
                            "pat": {
                                "id": "p-1",
                                "name": body["name"],
                                "expires_at": body["expires_at"],
                                "created_at": "2025-01-01T00:00:00Z"
                            }
                        })),
                    )
                }),
            )
            .route(
                "/api/v1/mcp",
                post(move |headers: HeaderMap| async move {
                    if bearer(&headers) != Some(accepted_pat) {
                        return (StatusCode::UNAUTHORIZED, Json(json!({})));
                    }
                    (
                        StatusCode::OK,
                        Json(json!({
                            "jsonrpc": "2.0",
                            "id": 1,
                            "result": {"protocolVersion": "2025-06-18", "serverInfo": {"name": "requirements"}}
                        })),
                    )
                }),
            )
    }

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn controller(answers: Vec<String>) -> InitController<ScriptedPrompter> {
        InitController::new(ScriptedPrompter::new(answers))
            .with_policy(RetryPolicy::default().with_backoff_unit(Duration::ZERO))
            .with_hostname("devbox")
    }

    fn config_path(home: &tempfile::TempDir) -> PathBuf {
        home.path().join(".requirements-mcp").join("config.json")
    }

    #[tokio::test]
    async fn happy_path_writes_private_config_and_wipes_secrets() {
        let base = spawn(fake_backend("pat_xyz")).await;
        let home = tempfile::tempdir().unwrap();
        let path = config_path(&home);

        let mut init = controller(vec![base.clone(), "alice".into(), "s3cret".into()]);
        let outcome = init.run(&path).await.unwrap();

        assert_eq!(outcome.config_path, path);
        assert_eq!(outcome.backup_path, None);
        assert_eq!(outcome.username, "alice");
        assert!(outcome.pat_name.starts_with("MCP Server - devbox - "));

        let doc = ConfigDocument::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc.backend_api_url, base);
        assert_eq!(doc.pat_token, "pat_xyz");
        assert_eq!(doc.request_timeout, "30s");
        assert_eq!(doc.log_level, "info");
        assert!(doc.validate().is_ok());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }

        assert!(!init.secrets().is_empty());
        assert!(init.secrets().all_wiped());
        assert!(Step::ALL
            .iter()
            .all(|s| init.progress().status(*s) == StepStatus::Completed));
    }

    #[tokio::test]
    async fn rejected_credentials_are_prompted_again() {
        let base = spawn(fake_backend("pat_xyz")).await;
        let home = tempfile::tempdir().unwrap();

        let mut init = controller(vec![
            "not a url".into(),
            base,
            "alice".into(),
            "wrong".into(),
            "alice".into(),
            "s3cret".into(),
        ]);
        init.run(&config_path(&home)).await.unwrap();

        assert_eq!(init.progress().record(Step::UrlCollection).attempts, 2);
        assert_eq!(init.progress().record(Step::Authentication).attempts, 2);
        assert!(init.secrets().all_wiped());
        assert_eq!(init.prompter().remaining_answers(), 0);
    }

    #[tokio::test]
    async fn declining_overwrite_leaves_existing_file_untouched() {
        let base = spawn(fake_backend("pat_xyz")).await;
        let home = tempfile::tempdir().unwrap();
        let path = config_path(&home);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let original = b"{\n  \"backend_api_url\": \"https://old.example.com\",\n  \"pat_token\": \"old\"\n}\n";
        std::fs::write(&path, original).unwrap();

        let mut init = InitController::new(
            ScriptedPrompter::new(vec![base, "alice".into(), "s3cret".into()])
                .with_confirmations([false]),
        )
        .with_policy(RetryPolicy::default().with_backoff_unit(Duration::ZERO));
        let err = init.run(&path).await.unwrap_err();

        assert_eq!(err.category, ErrorCategory::UserInput);
        assert!(!err.retryable);
        assert_eq!(std::fs::read(&path).unwrap(), original);
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1, "no backup or temp file expected");
        assert!(init.secrets().all_wiped());
    }

    #[tokio::test]
    async fn confirmed_overwrite_backs_up_previous_file() {
        let base = spawn(fake_backend("pat_xyz")).await;
        let home = tempfile::tempdir().unwrap();
        let path = config_path(&home);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "old contents").unwrap();

        let mut init = InitController::new(
            ScriptedPrompter::new(vec![base, "alice".into(), "s3cret".into()])
                .with_confirmations([true]),
        )
        .with_policy(RetryPolicy::default().with_backoff_unit(Duration::ZERO));
        let outcome = init.run(&path).await.unwrap();

        let backup = outcome.backup_path.unwrap();
        assert!(backup
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("config.json.backup."));
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "old contents");
    }

    #[tokio::test]
    async fn disabled_certificate_checks_abort_before_credentials() {
        let base = spawn(fake_backend("pat_xyz")).await;
        let home = tempfile::tempdir().unwrap();

        let mut init = controller(vec![base, "alice".into(), "s3cret".into()]).with_tls(
            TlsSettings {
                accept_invalid_certs: true,
            },
        );
        let err = init.run(&config_path(&home)).await.unwrap_err();

        assert!(err.security_risk);
        assert_eq!(init.prompter().prompts, vec!["Backend API URL".to_string()]);
        assert!(!config_path(&home).exists());
    }

    #[tokio::test]
    async fn failed_validation_still_wipes_every_secret() {
        let base = spawn(fake_backend("some-other-pat")).await;
        let home = tempfile::tempdir().unwrap();

        let mut init = controller(vec![base, "alice".into(), "s3cret".into()]);
        let err = init.run(&config_path(&home)).await.unwrap_err();

        assert_eq!(err.message, "PAT validation failed: invalid or expired token");
        assert_eq!(init.progress().status(Step::ConfigValidation), StepStatus::Failed);
        assert_eq!(init.progress().record(Step::ConfigValidation).attempts, 2);
        assert!(init.secrets().all_wiped());
    }

    #[tokio::test]
    async fn unreachable_backend_can_be_abandoned() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let home = tempfile::tempdir().unwrap();

        let mut init = InitController::new(
            ScriptedPrompter::new(vec![dead]).with_confirmations([false]),
        )
        .with_policy(RetryPolicy::default().with_backoff_unit(Duration::ZERO));
        let err = init.run(&config_path(&home)).await.unwrap_err();

        assert_eq!(err.message, "initialization cancelled");
        assert_eq!(init.progress().record(Step::ConnectivityTest).attempts, 3);
        assert_eq!(init.progress().status(Step::ConnectivityTest), StepStatus::Failed);
    }
}
