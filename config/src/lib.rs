//! Configuration service for the gateway.
//!
//! Holds the gateway API keys, the upstream credential seeds, and the
//! Claude-surface model mapping behind a read/write lock, and owns the one
//! persistence side effect in the workspace: writing refreshed tokens back
//! to the configuration file. Stores built from injected sources (raw or
//! base64-encoded JSON from the environment, or in-memory configuration)
//! are non-persistent; `persist` is a logged no-op for them.
//!
//! There is deliberately no ambient global here: the store is constructed
//! once by the embedding process and injected into the account pool and the
//! request pipeline.

mod persist;

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use dragoman_types::Credential;

/// Model mapping for the Claude-style surface: caller model ids are bucketed
/// into a fast and a slow tier, each naming a gateway model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMapping {
    #[serde(default = "default_tier_model")]
    pub fast: String,
    #[serde(default = "default_tier_model")]
    pub slow: String,
}

fn default_tier_model() -> String {
    "deepseek-chat".to_string()
}

impl Default for ModelMapping {
    fn default() -> Self {
        Self {
            fast: default_tier_model(),
            slow: default_tier_model(),
        }
    }
}

/// The persisted configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway API keys. A caller bearing one of these gets pool mode.
    #[serde(default)]
    pub keys: Vec<String>,
    /// Upstream credential seeds.
    #[serde(default)]
    pub accounts: Vec<Credential>,
    #[serde(default)]
    pub claude_model_mapping: ModelMapping,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("configuration value is neither JSON nor base64-encoded JSON")]
    Undecodable,
}

/// Shared, injectable configuration store.
///
/// Reads hand out snapshots; the only writer is `update_account_token`,
/// invoked from the account pool's token refresh path. Last writer wins
/// across concurrent refreshes.
#[derive(Debug)]
pub struct ConfigStore {
    inner: RwLock<GatewayConfig>,
    /// Persistence target; `None` for injected configuration.
    path: Option<PathBuf>,
}

impl ConfigStore {
    /// Build a store backed by a JSON file on disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: GatewayConfig = serde_json::from_str(&raw)?;
        Ok(Self {
            inner: RwLock::new(config),
            path: Some(path.to_path_buf()),
        })
    }

    /// Build a non-persistent store from an environment-injected value:
    /// raw JSON, or base64-encoded JSON.
    pub fn from_env_json(raw: &str) -> Result<Self, ConfigError> {
        let config = match serde_json::from_str::<GatewayConfig>(raw) {
            Ok(config) => config,
            Err(_) => {
                let decoded = BASE64
                    .decode(raw.trim())
                    .map_err(|_| ConfigError::Undecodable)?;
                serde_json::from_slice(&decoded)?
            }
        };
        Ok(Self::in_memory(config))
    }

    /// Build a non-persistent store from an already-constructed config.
    #[must_use]
    pub fn in_memory(config: GatewayConfig) -> Self {
        Self {
            inner: RwLock::new(config),
            path: None,
        }
    }

    /// Snapshot of the gateway API keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.read().expect("config lock poisoned").keys.clone()
    }

    /// Snapshot of the credential seeds.
    #[must_use]
    pub fn accounts(&self) -> Vec<Credential> {
        self.inner
            .read()
            .expect("config lock poisoned")
            .accounts
            .clone()
    }

    /// Snapshot of the Claude-surface model mapping.
    #[must_use]
    pub fn claude_model_mapping(&self) -> ModelMapping {
        self.inner
            .read()
            .expect("config lock poisoned")
            .claude_model_mapping
            .clone()
    }

    /// Record a refreshed token for the account with the given identifier,
    /// then persist. Unknown identifiers only persist (the account was
    /// injected outside the config document).
    pub fn update_account_token(&self, identifier: &str, token: &str) {
        {
            let mut config = self.inner.write().expect("config lock poisoned");
            if let Some(account) = config
                .accounts
                .iter_mut()
                .find(|a| a.identifier() == Some(identifier))
            {
                account.token = Some(token.to_string());
            }
        }
        self.persist();
    }

    /// Write the current configuration back to its file, atomically.
    ///
    /// A no-op for injected configuration. Write failures are logged and
    /// swallowed: a read-only config file must not fail the request that
    /// triggered a token refresh.
    pub fn persist(&self) {
        let Some(path) = self.path.as_deref() else {
            tracing::info!("configuration is injected; skipping persist");
            return;
        };

        let snapshot = self.inner.read().expect("config lock poisoned").clone();
        let bytes = match serde_json::to_vec_pretty(&snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%e, "failed to serialize configuration");
                return;
            }
        };

        if let Err(e) = persist::atomic_write(path, &bytes) {
            tracing::warn!(path = %path.display(), %e, "failed to persist configuration");
        }
    }
}
