//! Server configuration.
//!
//! Loaded from a YAML file on disk, with the path itself resolved from the
//! `PAS_CONFIG_FILE` environment variable or a fixed default — the one
//! setting this process reads from the environment, everything else is
//! pinned down in the file so a deployment can diff it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Default location read when `PAS_CONFIG_FILE` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/approval-service/config.yaml";

/// Default time-to-live for the webhook delivery de-dup cache.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(15);
/// Default lease duration for a workflow-run lease.
pub const DEFAULT_WORKFLOW_LEASE_DURATION: Duration = Duration::from_secs(60);
/// Default lease duration for an access-request lease.
pub const DEFAULT_ACCESS_REQUEST_LEASE_DURATION: Duration = Duration::from_secs(10);
/// Default reconciler sweep cadence.
pub const DEFAULT_RECONCILER_CADENCE: Duration = Duration::from_secs(30);
/// Default timeout applied to a single webhook-sink hand-off.
pub const DEFAULT_WEBHOOK_SINK_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline given to in-flight work during graceful shutdown.
pub const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config file '{path}' declares no event sources")]
    NoEventSources { path: String },
}

/// Root configuration document, one file per process.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub approval_service: ApprovalServiceConfig,
    pub event_sources: EventSourcesConfig,
}

/// The identity/access-control plane this process files and watches access
/// requests against.
#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalServiceConfig {
    pub teleport: TeleportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeleportConfig {
    pub proxy_addrs: Vec<String>,
    pub identity_file: PathBuf,
    pub user: String,
    pub role_to_request: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventSourcesConfig {
    #[serde(default)]
    pub github: Vec<GitHubSourceConfig>,
}

/// One configured `(org, repo)` the webhook ingress accepts deliveries for.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubSourceConfig {
    pub webhook_addr: String,
    pub org: String,
    pub repo: String,
    pub environments: Vec<String>,
    pub secret: String,
    pub app_id: String,
    pub installation_id: String,
    pub private_key_path: PathBuf,
}

impl Config {
    /// Resolve the config path from `PAS_CONFIG_FILE`, falling back to
    /// [`DEFAULT_CONFIG_PATH`], and load it.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let path = std::env::var("PAS_CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());
        Self::load(Path::new(&path))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config: Self = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        if config.event_sources.github.is_empty() {
            return Err(ConfigError::NoEventSources {
                path: path.display().to_string(),
            });
        }

        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
approval_service:
  teleport:
    proxy_addrs: ["proxy.example.com:443"]
    identity_file: /etc/approval-service/identity
    user: approval-bridge
    role_to_request: reviewer
event_sources:
  github:
    - webhook_addr: "0.0.0.0:8443"
      org: gravitational
      repo: teleport
      environments: ["build/prod"]
      secret: supersecret
      app_id: "12345"
      installation_id: "67890"
      private_key_path: /etc/approval-service/github-app.pem
"#;

    #[test]
    fn parses_a_well_formed_document() {
        let config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.event_sources.github.len(), 1);
        assert_eq!(config.event_sources.github[0].org, "gravitational");
        assert_eq!(config.approval_service.teleport.user, "approval-bridge");
    }

    #[test]
    fn rejects_a_document_with_no_event_sources() {
        let tmp = std::env::temp_dir().join(format!("pas-config-test-{}.yaml", std::process::id()));
        std::fs::write(
            &tmp,
            "approval_service:\n  teleport:\n    proxy_addrs: []\n    identity_file: /tmp/identity\n    user: u\n    role_to_request: r\nevent_sources:\n  github: []\n",
        )
        .unwrap();

        let err = Config::load(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::NoEventSources { .. }));

        let _ = std::fs::remove_file(&tmp);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Config::load(Path::new("/nonexistent/pas-config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
