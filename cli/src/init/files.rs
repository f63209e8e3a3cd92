//! Config generation and the on-disk side of init: backup, directory setup,
//! write probe and the atomic 0600 write.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use requirements_mcp_core::config::ConfigDocument;
use requirements_mcp_core::secure::SecureString;
use url::Url;

use crate::init::error::InitError;

pub const CONFIG_FILE_MODE: u32 = 0o600;
pub const CONFIG_DIR_MODE: u32 = 0o755;

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

#[cfg(not(unix))]
trait DirBuilderExt {
    fn mode(&mut self, _mode: u32) -> &mut Self;
}

#[cfg(not(unix))]
impl DirBuilderExt for fs::DirBuilder {
    fn mode(&mut self, _mode: u32) -> &mut Self {
        self
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// Build and validate the document written by init.
pub fn generate_config(base: &Url, pat: &SecureString) -> Result<ConfigDocument, InitError> {
    let backend = base.as_str().trim_end_matches('/');
    let doc = ConfigDocument::new(backend, pat.expose());
    doc.validate().map_err(|e| {
        InitError::validation("generated configuration is invalid")
            .with_cause(e)
            .fatal()
    })?;
    Ok(doc)
}

/// `<path>.backup.<YYYYMMDD-HHMMSS>`
pub fn backup_path(path: &Path, now: DateTime<Local>) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".backup.{}", now.format("%Y%m%d-%H%M%S")));
    PathBuf::from(name)
}

pub struct ConfigFileManager {
    path: PathBuf,
}

impl ConfigFileManager {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, InitError> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(InitError::file_system(
                format!("config path {} must be absolute", path.display()),
                &path,
            )
            .fatal());
        }
        if path.file_name().is_none() {
            return Err(InitError::file_system(
                format!("config path {} has no file name", path.display()),
                &path,
            )
            .fatal());
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn parent(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("/"))
    }

    /// Copy the current file aside. `fs::copy` carries the permission bits.
    pub fn backup(&self, now: DateTime<Local>) -> Result<PathBuf, InitError> {
        let target = backup_path(&self.path, now);
        fs::copy(&self.path, &target).map_err(|e| {
            InitError::file_system(
                format!("could not back up {}", self.path.display()),
                &self.path,
            )
            .with_cause(e)
        })?;
        Ok(target)
    }

    /// Create missing parent directories with mode 0755.
    pub fn ensure_parent(&self) -> Result<(), InitError> {
        let parent = self.parent();
        if parent.is_dir() {
            return Ok(());
        }
        fs::DirBuilder::new()
            .recursive(true)
            .mode(CONFIG_DIR_MODE)
            .create(parent)
            // umask may have narrowed the mode
            .and_then(|()| set_mode(parent, CONFIG_DIR_MODE))
            .map_err(|e| {
                InitError::file_system(
                    format!("could not create directory {}", parent.display()),
                    &self.path,
                )
                .with_cause(e)
            })
    }

    /// Write and delete a dotfile next to the target.
    pub fn probe_writable(&self) -> Result<(), InitError> {
        let probe = self
            .parent()
            .join(format!(".write-probe-{}", std::process::id()));
        let result = fs::File::create(&probe).and_then(|mut file| {
            file.write_all(b"probe")?;
            file.sync_all()
        });
        let _ = fs::remove_file(&probe);
        result.map_err(|e| {
            InitError::file_system(
                format!("directory {} is not writable", self.parent().display()),
                &self.path,
            )
            .with_cause(e)
        })
    }

    /// Temp file in the target directory, mode 0600, then rename over the
    /// target.
    pub fn write(&self, doc: &ConfigDocument) -> Result<(), InitError> {
        self.ensure_parent()?;
        self.probe_writable()?;

        let fs_error = |what: &str, e: &dyn std::fmt::Display| {
            InitError::file_system(
                format!("{what} {}", self.path.display()),
                &self.path,
            )
            .with_cause(e)
        };

        let json = doc
            .to_json()
            .map_err(|e| InitError::validation("could not serialize configuration").with_cause(e).fatal())?;

        let mut temp = tempfile::NamedTempFile::new_in(self.parent())
            .map_err(|e| fs_error("could not create a temporary file for", &e))?;
        set_mode(temp.path(), CONFIG_FILE_MODE)
            .map_err(|e| fs_error("could not restrict permissions of", &e))?;
        temp.write_all(json.as_bytes())
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| fs_error("could not write", &e))?;
        temp.persist(&self.path)
            .map_err(|e| fs_error("could not replace", &e.error))?;
        set_mode(&self.path, CONFIG_FILE_MODE)
            .map_err(|e| fs_error("could not restrict permissions of", &e))?;

        tracing::debug!(path = %self.path.display(), "config written");
        Ok(())
    }
}
