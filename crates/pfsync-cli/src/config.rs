//! Host configuration, stored as `config.json` in the state directory.

use anyhow::{Context, Result};
use pfsync_core::{ClientId, KdfParams, SyncConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Remote key of the sync file
    #[serde(default = "default_artifact")]
    pub artifact: String,

    /// Gzip uploads before encryption/encoding
    #[serde(default = "default_true")]
    pub compress: bool,

    #[serde(default = "default_network_timeout_secs")]
    pub network_timeout_secs: u64,

    #[serde(default = "default_max_revision_retries")]
    pub max_revision_retries: u32,

    /// Directory used as the remote store; `--remote` overrides it
    #[serde(default)]
    pub remote_dir: Option<PathBuf>,

    /// Identity of this installation. Generated on first load.
    #[serde(default)]
    pub client_id: Option<ClientId>,
}

fn default_artifact() -> String {
    "pfsync/main".to_string()
}

fn default_true() -> bool {
    true
}

fn default_network_timeout_secs() -> u64 {
    30
}

fn default_max_revision_retries() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            artifact: default_artifact(),
            compress: default_true(),
            network_timeout_secs: default_network_timeout_secs(),
            max_revision_retries: default_max_revision_retries(),
            remote_dir: None,
            client_id: None,
        }
    }
}

impl Config {
    /// Load configuration from the state directory.
    ///
    /// Writes a default file when none exists, and persists a freshly
    /// generated client id when the file has none.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let config_file = state_dir.join(CONFIG_FILE);

        let existed = config_file.exists();
        let mut config = if existed {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", CONFIG_FILE))?;
            tracing::debug!("Loaded configuration from {:?}", config_file);
            config
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_file);
            Config::default()
        };

        let needs_save = !existed || config.client_id.is_none();
        if config.client_id.is_none() {
            let client_id = ClientId::generate();
            tracing::info!("Generated client ID: {}", client_id);
            config.client_id = Some(client_id);
        }
        if needs_save {
            config.save(state_dir)?;
        }

        Ok(config)
    }

    pub fn save(&self, state_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create state directory: {:?}", state_dir))?;
        let config_file = state_dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_file, content)
            .with_context(|| format!("Failed to write config: {:?}", config_file))?;
        Ok(())
    }

    /// The client id; `load` always fills it in.
    pub fn client_id(&self) -> Result<ClientId> {
        self.client_id
            .context("Config has no client ID; load it with Config::load")
    }

    pub fn sync_config(&self, passphrase: Option<String>) -> SyncConfig {
        SyncConfig {
            artifact: self.artifact.clone(),
            compress: self.compress,
            passphrase,
            kdf: KdfParams::default(),
            network_timeout: Duration::from_secs(self.network_timeout_secs),
            max_revision_retries: self.max_revision_retries,
        }
    }
}
