//! Session configuration.
//!
//! Loaded from a TOML file or from `REMORA_*` environment variables.
//! Credentials belong to the session; the schema-document fetch reuses them
//! for HTTP basic auth.

use serde::Deserialize;
use std::path::Path;

/// Connection settings for one service session.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the service's RPC endpoint.
    pub endpoint: String,
    /// Base URL of the repository the schema documents are served from.
    pub repo_url: String,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub default_project: Option<String>,
    /// TLS certificate validation for repository fetches. Defaults to
    /// enabled; disable only for legacy servers with self-signed
    /// certificates.
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
}

fn default_verify_tls() -> bool {
    true
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

impl ClientConfig {
    pub fn from_file(path: &Path) -> Result<ClientConfig, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Read the session settings from `REMORA_ENDPOINT`, `REMORA_REPO_URL`,
    /// `REMORA_USER`, `REMORA_PASSWORD`, and optionally
    /// `REMORA_DEFAULT_PROJECT` and `REMORA_VERIFY_TLS` (`false`/`0`
    /// disables).
    pub fn from_env() -> Result<ClientConfig, ConfigError> {
        let required = |key: &'static str, name: &'static str| {
            std::env::var(key).map_err(|_| ConfigError::Missing(name))
        };
        let verify_tls = match std::env::var("REMORA_VERIFY_TLS") {
            Ok(raw) => !matches!(raw.as_str(), "false" | "0"),
            Err(_) => true,
        };
        Ok(ClientConfig {
            endpoint: required("REMORA_ENDPOINT", "endpoint")?,
            repo_url: required("REMORA_REPO_URL", "repo_url")?,
            user: required("REMORA_USER", "user")?,
            password: required("REMORA_PASSWORD", "password")?,
            default_project: std::env::var("REMORA_DEFAULT_PROJECT").ok(),
            verify_tls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
endpoint = "https://alm.example.com/ws"
repo_url = "https://alm.example.com/repo"
user = "svc-tests"
password = "secret"
default_project = "STARTER"
verify_tls = false
"#
        )
        .unwrap();
        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.endpoint, "https://alm.example.com/ws");
        assert_eq!(config.default_project.as_deref(), Some("STARTER"));
        assert!(!config.verify_tls);
    }

    #[test]
    fn verify_tls_defaults_to_enabled() {
        let config: ClientConfig = toml::from_str(
            r#"
endpoint = "https://alm.example.com/ws"
repo_url = "https://alm.example.com/repo"
user = "svc"
password = "secret"
"#,
        )
        .unwrap();
        assert!(config.verify_tls);
        assert_eq!(config.default_project, None);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ClientConfig::from_file(Path::new("/nonexistent/remora.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
