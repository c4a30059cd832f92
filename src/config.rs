use serde::Deserialize;
use std::{fs, path::Path};
use anyhow::{ensure, Context, Result};

use crate::bridge::{BridgeConfig, SecurityLevel};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub mining: Mining,
    #[serde(default)]
    pub bridge: Bridge,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default)]
    pub logging: Logging,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    #[serde(default = "default_initial_difficulty")]
    pub initial_difficulty: u32,
    #[serde(default = "default_block_reward")]
    pub block_reward: u64,
    #[serde(default = "default_adjustment_interval")]
    pub difficulty_adjustment_interval: u64,
    #[serde(default = "default_target_block_time")]
    pub target_block_time: u64,
    /// User transactions per block; the reward transaction comes on top.
    #[serde(default = "default_max_txs")]
    pub max_transactions_per_block: usize,
    #[serde(default = "default_max_future")]
    pub max_future_block_time: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            initial_difficulty: default_initial_difficulty(),
            block_reward: default_block_reward(),
            difficulty_adjustment_interval: default_adjustment_interval(),
            target_block_time: default_target_block_time(),
            max_transactions_per_block: default_max_txs(),
            max_future_block_time: default_max_future(),
        }
    }
}

impl LedgerConfig {
    /// Every block pays a positive reward transaction, so a zero reward
    /// would make an empty block unappendable.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.block_reward > 0, "ledger.block_reward must be positive");
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Mining {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Hash attempts between stop-flag checks.
    #[serde(default = "default_batch")]
    pub batch_size: u64,
    #[serde(default)]
    pub reward_address: Option<String>,
}

impl Default for Mining {
    fn default() -> Self {
        Self { enabled: false, threads: default_threads(), batch_size: default_batch(), reward_address: None }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Bridge {
    #[serde(default = "default_bridge_id")]
    pub bridge_id: String,
    #[serde(default = "default_source_network")]
    pub source_network: String,
    #[serde(default = "default_target_network")]
    pub target_network: String,
    #[serde(default = "default_required_confirmations")]
    pub required_confirmations: u64,
    #[serde(default = "default_validator_threshold")]
    pub validator_threshold: usize,
    /// Percent of the transfer amount, e.g. `0.1` for 0.1 %.
    #[serde(default = "default_fee_percentage")]
    pub fee_percentage: f64,
    #[serde(default = "default_min_amount")]
    pub min_transfer_amount: u64,
    #[serde(default = "default_max_amount")]
    pub max_transfer_amount: u64,
    #[serde(default)]
    pub security_level: SecurityLevel,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_secs: u64,
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for Bridge {
    fn default() -> Self {
        Self {
            bridge_id: default_bridge_id(),
            source_network: default_source_network(),
            target_network: default_target_network(),
            required_confirmations: default_required_confirmations(),
            validator_threshold: default_validator_threshold(),
            fee_percentage: default_fee_percentage(),
            min_transfer_amount: default_min_amount(),
            max_transfer_amount: default_max_amount(),
            security_level: SecurityLevel::default(),
            poll_interval_secs: default_poll_interval(),
            stall_timeout_secs: default_stall_timeout(),
            admin_token: None,
        }
    }
}

impl Bridge {
    /// Immutable per-bridge parameters handed to the coordinator.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            required_confirmations: self.required_confirmations,
            validator_threshold: self.validator_threshold,
            fee_basis_points: (self.fee_percentage * 100.0).round().max(0.0) as u64,
            min_transfer_amount: self.min_transfer_amount,
            max_transfer_amount: self.max_transfer_amount,
            security_level: self.security_level,
            stall_timeout_secs: self.stall_timeout_secs,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Storage {
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for Storage {
    fn default() -> Self {
        Self { path: default_storage_path() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Metrics {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for Metrics {
    fn default() -> Self {
        Self { enabled: false, bind: default_bind() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Logging {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Self { level: default_log_level(), json: false }
    }
}

fn default_initial_difficulty() -> u32 { 4 }
fn default_block_reward() -> u64 { 50 }
fn default_adjustment_interval() -> u64 { 10 }
fn default_target_block_time() -> u64 { 60 }
fn default_max_txs() -> usize { 100 }
fn default_max_future() -> u64 { 2 * 60 * 60 }
fn default_threads() -> usize { 4 }
fn default_batch() -> u64 { 4_096 }
fn default_bridge_id() -> String { "tessera-evm".into() }
fn default_source_network() -> String { "tessera".into() }
fn default_target_network() -> String { "evm".into() }
fn default_required_confirmations() -> u64 { 6 }
fn default_validator_threshold() -> usize { 3 }
fn default_fee_percentage() -> f64 { 0.1 }
fn default_min_amount() -> u64 { 1 }
fn default_max_amount() -> u64 { 1_000_000 }
fn default_poll_interval() -> u64 { 15 }
fn default_stall_timeout() -> u64 { 60 * 60 }
fn default_storage_path() -> String { "tessera_data".into() }
fn default_bind() -> String { "127.0.0.1:9100".into() }
fn default_log_level() -> String { "info".into() }

/// Read the TOML file at `p` and deserialize into `Config`.
///
/// # Errors
/// * Returns an anyhow::Error if the file cannot be read or parsed.
pub fn load<P: AsRef<Path>>(p: P) -> Result<Config> {
    let text = fs::read_to_string(&p)
        .with_context(|| format!("couldn't read config file {}", p.as_ref().display()))?;
    load_from_str(&text)
}

pub fn load_from_str(text: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(text).context("invalid TOML in config file")?;
    cfg.ledger.validate()?;
    Ok(cfg)
}
