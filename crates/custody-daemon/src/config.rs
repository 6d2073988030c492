//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{DaemonError, Result};

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "CUSTODY_CONFIG";

const DEFAULT_MAX_PENDING: usize = 256;

const DEFAULT_COOKIE_TTL_SECS: u64 = 24 * 60 * 60;

/// Vault daemon configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// File holding the persisted root seed
    pub seed_path: PathBuf,

    /// Unix socket path for IPC
    pub ipc_socket_path: PathBuf,

    /// Page that hands out session cookies to untrusted callers.
    /// Without one, cookie-less untrusted sessions are refused.
    #[serde(default)]
    pub cookie_redirect_url: Option<String>,

    /// In-flight request limit per channel
    #[serde(default = "default_max_pending")]
    pub max_pending_requests: usize,

    /// Lifetime of an issued session cookie, in seconds
    #[serde(default = "default_cookie_ttl")]
    pub cookie_ttl_secs: u64,
}

fn default_max_pending() -> usize {
    DEFAULT_MAX_PENDING
}

fn default_cookie_ttl() -> u64 {
    DEFAULT_COOKIE_TTL_SECS
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            seed_path: Self::default_seed_path(),
            ipc_socket_path: Self::default_ipc_path(),
            cookie_redirect_url: None,
            max_pending_requests: DEFAULT_MAX_PENDING,
            cookie_ttl_secs: DEFAULT_COOKIE_TTL_SECS,
        }
    }
}

impl VaultConfig {
    fn default_ipc_path() -> PathBuf {
        // Use XDG_RUNTIME_DIR if available, fallback to /tmp
        std::env::var_os("XDG_RUNTIME_DIR")
            .map(|dir| PathBuf::from(dir).join("custody.sock"))
            .unwrap_or_else(|| PathBuf::from("/tmp/custody.sock"))
    }

    fn default_seed_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("custody")
            .join("seed.json")
    }

    /// Config file location: `CUSTODY_CONFIG`, else the XDG config dir
    pub fn default_path() -> PathBuf {
        std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("/etc"))
                    .join("custody")
                    .join("daemon.json")
            })
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load `path`, writing the defaults there first if it does not exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        let config = Self::default();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.save(path)?;
        info!("Created default config at {:?}", path);
        Ok(config)
    }

    /// Reject settings the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_pending_requests == 0 {
            return Err(DaemonError::Config(
                "max_pending_requests must be greater than zero".to_string(),
            ));
        }

        if self.cookie_ttl_secs == 0 {
            return Err(DaemonError::Config(
                "cookie_ttl_secs must be greater than zero".to_string(),
            ));
        }

        if let Some(url) = &self.cookie_redirect_url {
            if !url.starts_with("https://") || url.len() <= "https://".len() {
                return Err(DaemonError::Config(format!(
                    "cookie_redirect_url must be an https URL, got {}",
                    url
                )));
            }
        }

        if self.seed_path.as_os_str().is_empty() {
            return Err(DaemonError::Config("seed_path must be set".to_string()));
        }

        Ok(())
    }

    /// Create directories if they don't exist
    pub fn ensure_directories(&self) -> Result<()> {
        if let Some(parent) = self.seed_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = self.ipc_socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

/// XDG base directory lookups
mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share"))
            })
    }

    pub fn config_dir() -> Option<PathBuf> {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_valid() {
        VaultConfig::default().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = VaultConfig {
            max_pending_requests: 0,
            ..VaultConfig::default()
        };
        assert!(matches!(config.validate(), Err(DaemonError::Config(_))));

        let config = VaultConfig {
            cookie_ttl_secs: 0,
            ..VaultConfig::default()
        };
        assert!(matches!(config.validate(), Err(DaemonError::Config(_))));

        for url in ["http://cookies.example", "https://", "cookies.example"] {
            let config = VaultConfig {
                cookie_redirect_url: Some(url.to_string()),
                ..VaultConfig::default()
            };
            assert!(config.validate().is_err(), "accepted {}", url);
        }

        let config = VaultConfig {
            cookie_redirect_url: Some("https://cookies.example/issue".to_string()),
            ..VaultConfig::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("daemon.json");

        let created = VaultConfig::load_or_create(&path).unwrap();
        assert!(path.exists());

        let loaded = VaultConfig::load_or_create(&path).unwrap();
        assert_eq!(created, loaded);
    }

    #[test]
    fn test_optional_fields_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.json");
        std::fs::write(
            &path,
            r#"{"seed_path": "/tmp/seed.json", "ipc_socket_path": "/tmp/custody.sock"}"#,
        )
        .unwrap();

        let config = VaultConfig::load(&path).unwrap();
        assert_eq!(config.cookie_redirect_url, None);
        assert_eq!(config.max_pending_requests, DEFAULT_MAX_PENDING);
        assert_eq!(config.cookie_ttl_secs, DEFAULT_COOKIE_TTL_SECS);
    }
}
