//! Client configuration: the two directories the wallet needs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use irma_core::{ErrorKind, SessionError, SessionResult};

/// Where the wallet keeps its state. Loaded from a TOML file (typically
/// `~/.irma/config.toml`); missing file means defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Credentials, master secret, enrollments, logs.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// The parsed scheme configuration tree.
    #[serde(default = "default_configuration_dir")]
    pub configuration_dir: PathBuf,
}

fn home_or_cwd(suffix: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(suffix))
        .unwrap_or_else(|_| PathBuf::from(suffix))
}

fn default_storage_dir() -> PathBuf {
    home_or_cwd(".irma/storage")
}

fn default_configuration_dir() -> PathBuf {
    home_or_cwd(".irma/irma_configuration")
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            configuration_dir: default_configuration_dir(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> SessionResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SessionError::wrap(ErrorKind::Serialization, e))?;
        toml::from_str(&contents).map_err(|e| SessionError::wrap(ErrorKind::Serialization, e))
    }

    pub fn save(&self, path: &Path) -> SessionResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| SessionError::wrap(ErrorKind::Serialization, e))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SessionError::wrap(ErrorKind::Serialization, e))?;
        }
        std::fs::write(path, contents)
            .map_err(|e| SessionError::wrap(ErrorKind::Serialization, e))
    }
}
