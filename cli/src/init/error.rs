use std::fmt;
use std::path::Path;

use console::style;
use requirements_mcp_core::redact::mask_sensitive;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Auth,
    FileSystem,
    Validation,
    UserInput,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Auth => "authentication",
            ErrorCategory::FileSystem => "file system",
            ErrorCategory::Validation => "validation",
            ErrorCategory::UserInput => "input",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A categorized init failure. `cause` is always sanitized; `message` is
/// fixed text and callers mask anything user- or server-supplied in it.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct InitError {
    pub category: ErrorCategory,
    pub message: String,
    pub cause: Option<String>,
    pub retryable: bool,
    pub security_risk: bool,
    pub guidance: Vec<String>,
}

impl InitError {
    fn new(category: ErrorCategory, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            category,
            message: message.into(),
            cause: None,
            retryable,
            security_risk: false,
            guidance: Vec::new(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Network, message, true)
            .with_guidance("Check that the backend URL is correct and the server is running")
            .with_guidance("Check your network connection, proxy and firewall settings")
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Auth, message, true)
            .with_guidance("Verify your username and password")
            .with_guidance("Make sure your account is active and allowed to create access tokens")
    }

    pub fn file_system(message: impl Into<String>, path: &Path) -> Self {
        let dir = path.parent().unwrap_or(path);
        Self::new(ErrorCategory::FileSystem, message, true)
            .with_guidance(format!(
                "Check that you have write permission to {}",
                dir.display()
            ))
            .with_guidance("Check that the disk is not full")
            .with_guidance("Use --config to choose a different location")
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, message, true)
    }

    pub fn user_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::UserInput, message, true)
    }

    /// Transport security problem. Never retried.
    pub fn security(message: impl Into<String>) -> Self {
        let mut err = Self::new(
            ErrorCategory::Validation,
            format!("security risk: {}", message.into()),
            false,
        )
        .with_guidance("Certificate verification must stay enabled when sending credentials")
        .with_guidance("Fix the server certificate instead of disabling verification");
        err.security_risk = true;
        err
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCategory::UserInput, "initialization cancelled", false)
    }

    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(mask_sensitive(&cause.to_string()).into_owned());
        self
    }

    pub fn with_guidance(mut self, line: impl Into<String>) -> Self {
        self.guidance.push(line.into());
        self
    }

    pub fn fatal(mut self) -> Self {
        self.retryable = false;
        self
    }

    /// Multi-line terminal rendering with numbered guidance.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{} {} error: {}",
            style("✗").red().bold(),
            self.category,
            self.message
        );
        if let Some(cause) = &self.cause {
            out.push_str(&format!("\n  cause: {cause}"));
        }
        if !self.guidance.is_empty() {
            out.push_str("\n  What you can try:");
            for (i, line) in self.guidance.iter().enumerate() {
                out.push_str(&format!("\n    {}. {line}", i + 1));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn causes_are_sanitized_and_messages_kept_verbatim() {
        let err = InitError::validation("PAT validation failed: invalid or expired token")
            .with_cause("server said: token=abc.def");
        assert_eq!(err.message, "PAT validation failed: invalid or expired token");
        assert!(!err.cause.as_deref().unwrap().contains("abc.def"));
        assert!(!err.render().contains("abc.def"));
    }

    #[test]
    fn security_errors_are_fatal_validation_failures() {
        let err = InitError::security("certificate verification is disabled");
        assert_eq!(err.category, ErrorCategory::Validation);
        assert!(err.security_risk);
        assert!(!err.retryable);
        assert!(err.to_string().starts_with("security risk:"));
    }

    #[test]
    fn render_numbers_guidance() {
        let rendered = console::strip_ansi_codes(
            &InitError::file_system("cannot write", Path::new("/etc/x/config.json")).render(),
        )
        .into_owned();
        assert!(rendered.contains("file system error: cannot write"));
        assert!(rendered.contains("1. Check that you have write permission to /etc/x"));
        assert!(rendered.contains("3. Use --config"));
    }
}
