//! `--init`: interactive setup that logs in, mints a PAT and writes the
//! bridge configuration.

pub mod controller;
pub mod error;
pub mod files;
pub mod network;
pub mod progress;
pub mod prompt;
pub mod retry;
pub mod tls;

use std::path::Path;

use console::style;
use requirements_mcp_core::config::LogLevel;

pub use controller::{InitController, InitOutcome};
pub use error::{ErrorCategory, InitError};
pub use files::{ConfigFileManager, generate_config};
pub use progress::{ProgressTracker, SpinnerSlot, Step, StepStatus};
pub use prompt::{Prompter, ScriptedPrompter, TerminalPrompter};
pub use retry::RetryPolicy;
pub use tls::TlsSettings;

/// Run init on the terminal and map the result to a process exit code.
pub async fn run(config_path: &Path, tls: TlsSettings) -> i32 {
    requirements_mcp_runtime::logging::init_logging(LogLevel::Warn);

    let mut controller = InitController::new(TerminalPrompter::new())
        .with_tls(tls)
        .with_progress_output(true);

    match controller.run(config_path).await {
        Ok(outcome) => {
            eprintln!();
            eprintln!("{}", render_success(&outcome));
            0
        }
        Err(err) => {
            eprintln!();
            eprintln!("{}", err.render());
            eprintln!();
            eprintln!("{}", controller.progress().summary());
            1
        }
    }
}

fn render_success(outcome: &InitOutcome) -> String {
    let mut lines = vec![
        format!("{} Initialization complete", style("✓").green().bold()),
        format!("  Configuration: {}", outcome.config_path.display()),
        format!("  Backend:       {}", outcome.backend_url),
        format!("  User:          {}", outcome.username),
        format!("  Access token:  {} (expires {})", outcome.pat_name, outcome.pat_expires_at),
    ];
    if let Some(backup) = &outcome.backup_path {
        lines.push(format!("  Backup:        {}", backup.display()));
    }
    lines.push(String::new());
    lines.push("Next: add this command to your MCP host configuration:".to_string());
    lines.push(format!(
        "  requirements-mcp --config {}",
        outcome.config_path.display()
    ));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use url::Url;

    #[test]
    fn success_output_never_contains_the_token() {
        let outcome = InitOutcome {
            config_path: PathBuf::from("/home/u/.requirements-mcp/config.json"),
            backup_path: Some(PathBuf::from("/home/u/.requirements-mcp/config.json.backup.20250101-000000")),
            backend_url: Url::parse("https://api.example.com").unwrap(),
            username: "alice".into(),
            pat_name: "MCP Server - devbox - 2025-01-01".into(),
            pat_expires_at: "2026-01-01T00:00:00Z".into(),
        };
        let text = render_success(&outcome);
        assert!(text.contains("MCP Server - devbox - 2025-01-01"));
        assert!(text.contains("config.json.backup.20250101-000000"));
        assert!(text.contains("requirements-mcp --config /home/u/.requirements-mcp/config.json"));
    }
}
