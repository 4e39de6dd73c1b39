//! Client Configuration
//!
//! Loads orchestrator settings from TOML. Every section is optional and
//! falls back to its defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anchor_lang::prelude::Pubkey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Full client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Cluster the RPC backend talks to
    #[serde(default)]
    pub network: NetworkSettings,

    /// Arcium accounts needed to queue computations. Read-only use and
    /// ending surveys work without them.
    #[serde(default)]
    pub arcium: Option<ArciumSettings>,

    /// How finalize obtains plaintext sums
    #[serde(default)]
    pub decryption: DecryptionSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl ClientConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decryption.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.decryption.max_poll_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_poll_attempts must be greater than 0".to_string(),
            ));
        }

        if self.network.rpc_url.is_empty() {
            return Err(ConfigError::Invalid("rpc_url must not be empty".to_string()));
        }
        self.network.program_id()?;
        if let Some(arcium) = &self.arcium {
            arcium.accounts()?;
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(ConfigError::Invalid(format!(
                "Unknown log format: {}",
                self.logging.format
            )));
        }

        Ok(())
    }
}

fn parse_pubkey(field: &str, value: &str) -> Result<Pubkey, ConfigError> {
    Pubkey::from_str(value)
        .map_err(|e| ConfigError::Invalid(format!("{}: {} ({})", field, value, e)))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub rpc_url: String,

    /// Deployed survey program
    pub program_id: String,

    /// Fee payer and signer for admin writes
    pub keypair_path: Option<PathBuf>,
}

impl NetworkSettings {
    pub fn program_id(&self) -> Result<Pubkey, ConfigError> {
        parse_pubkey("program_id", &self.program_id)
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8899".to_string(),
            program_id: product_survey::ID.to_string(),
            keypair_path: None,
        }
    }
}

/// Arcium addresses for the survey's MXE, as printed by the Arcium CLI
/// after deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArciumSettings {
    pub mxe_account: String,
    pub cluster_account: String,
    pub pool_account: String,
    pub clock_account: String,
    pub mempool_account: String,
    pub executing_pool: String,
    pub init_sums_comp_def: String,
    pub accumulate_ratings_comp_def: String,
    pub reveal_sum_comp_def: String,
}

/// Parsed form of `ArciumSettings`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArciumAccounts {
    pub mxe_account: Pubkey,
    pub cluster_account: Pubkey,
    pub pool_account: Pubkey,
    pub clock_account: Pubkey,
    pub mempool_account: Pubkey,
    pub executing_pool: Pubkey,
    pub init_sums_comp_def: Pubkey,
    pub accumulate_ratings_comp_def: Pubkey,
    pub reveal_sum_comp_def: Pubkey,
}

impl ArciumSettings {
    pub fn accounts(&self) -> Result<ArciumAccounts, ConfigError> {
        Ok(ArciumAccounts {
            mxe_account: parse_pubkey("mxe_account", &self.mxe_account)?,
            cluster_account: parse_pubkey("cluster_account", &self.cluster_account)?,
            pool_account: parse_pubkey("pool_account", &self.pool_account)?,
            clock_account: parse_pubkey("clock_account", &self.clock_account)?,
            mempool_account: parse_pubkey("mempool_account", &self.mempool_account)?,
            executing_pool: parse_pubkey("executing_pool", &self.executing_pool)?,
            init_sums_comp_def: parse_pubkey("init_sums_comp_def", &self.init_sums_comp_def)?,
            accumulate_ratings_comp_def: parse_pubkey(
                "accumulate_ratings_comp_def",
                &self.accumulate_ratings_comp_def,
            )?,
            reveal_sum_comp_def: parse_pubkey("reveal_sum_comp_def", &self.reveal_sum_comp_def)?,
        })
    }
}

/// Where decrypted sums come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecryptMode {
    /// A gateway answers decryption requests; the client polls
    #[default]
    Gateway,
    /// No gateway: decrypt with the session oracle and call back unsigned
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecryptionSettings {
    pub mode: DecryptMode,

    /// Delay between `get_decrypted_sum` polls
    pub poll_interval_ms: u64,

    /// Polls before giving up and reporting the request as pending
    pub max_poll_attempts: u32,
}

impl DecryptionSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for DecryptionSettings {
    fn default() -> Self {
        Self {
            mode: DecryptMode::Gateway,
            poll_interval_ms: 2_000,
            max_poll_attempts: 20,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level
    pub level: String,

    /// Output format (text, json)
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}
