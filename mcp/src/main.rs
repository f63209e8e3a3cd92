use std::path::PathBuf;

use clap::Parser;

use requirements_mcp_cli::init::{self, TlsSettings};
use requirements_mcp_runtime::default_config_path;

#[derive(Parser)]
#[command(
    name = "requirements-mcp",
    version,
    about = "MCP bridge: relays JSON-RPC between stdio and the requirements backend"
)]
struct Cli {
    /// Config file path (default: ~/.requirements-mcp/config.json)
    #[arg(long, env = "REQUIREMENTS_MCP_CONFIG")]
    config: Option<PathBuf>,

    /// Interactive setup: log in, create an access token and write the config
    #[arg(short, long)]
    init: bool,

    /// Disable certificate verification. Init refuses to run with this set.
    #[arg(long, hide = true)]
    insecure_skip_tls_verify: bool,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = usage_exit_code(&err);
            let _ = err.print();
            std::process::exit(code);
        }
    };

    let config_path = match cli.config {
        Some(path) => path,
        None => match default_config_path() {
            Ok(path) => path,
            Err(err) => {
                eprintln!("error: {err}");
                std::process::exit(1);
            }
        },
    };

    let code = if cli.init {
        let tls = TlsSettings {
            accept_invalid_certs: cli.insecure_skip_tls_verify,
        };
        init::run(&config_path, tls).await
    } else {
        requirements_mcp_runtime::run(&config_path).await
    };
    std::process::exit(code);
}

/// `--help` and `--version` succeed; every other parse failure exits 1.
fn usage_exit_code(err: &clap::Error) -> i32 {
    if err.use_stderr() { 1 } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_failure(args: &[&str]) -> clap::Error {
        match Cli::try_parse_from(args) {
            Ok(_) => panic!("{args:?} parsed"),
            Err(err) => err,
        }
    }

    #[test]
    fn usage_errors_exit_one() {
        let err = parse_failure(&["requirements-mcp", "--bogus"]);
        assert_eq!(usage_exit_code(&err), 1);
    }

    #[test]
    fn help_and_version_exit_zero() {
        for flag in ["--help", "-h", "--version", "-V"] {
            let err = parse_failure(&["requirements-mcp", flag]);
            assert_eq!(usage_exit_code(&err), 0, "{flag}");
        }
    }

    #[test]
    fn init_flag_parses() {
        let cli = Cli::try_parse_from(["requirements-mcp", "--init"]).unwrap();
        assert!(cli.init);
    }
}
