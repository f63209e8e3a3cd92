use std::path::{Path, PathBuf};

use requirements_mcp_core::config::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, ConfigDocument, ConfigError, ValidatedConfig,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("could not determine home directory; pass --config explicitly")]
    NoHomeDir,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
}

/// `$HOME/.requirements-mcp/config.json`
pub fn default_config_path() -> Result<PathBuf, ConfigLoadError> {
    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or(ConfigLoadError::NoHomeDir)
}

pub fn load_config(path: &Path) -> Result<ValidatedConfig, ConfigLoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let invalid = |source| ConfigLoadError::Invalid {
        path: path.to_path_buf(),
        source,
    };
    let config = ConfigDocument::from_json(&raw)
        .map_err(invalid)?
        .validate()
        .map_err(invalid)?;

    tracing::debug!(
        path = %path.display(),
        backend = %config.backend_api_url,
        timeout = ?config.request_timeout,
        log_level = %config.log_level,
        "loaded config"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use requirements_mcp_core::config::LogLevel;
    use std::time::Duration;

    #[test]
    fn loads_and_validates_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"backend_api_url":"http://localhost:8080","pat_token":"pat_x","request_timeout":"5s","log_level":"debug"}"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.backend_api_url.as_str(), "http://localhost:8080/");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn missing_file_and_bad_content_are_distinct_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(matches!(load_config(&path), Err(ConfigLoadError::Read { .. })));

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(ConfigLoadError::Invalid { .. })
        ));

        std::fs::write(&path, r#"{"backend_api_url":"http://x","pat_token":""}"#).unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("pat_token"));
    }
}
