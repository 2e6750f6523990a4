use crate::types::ProcessSpec;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/var/berth/config.toml";

/// Environment entry that keeps the sync daemon from replacing its own binary.
pub const NO_UPGRADE_ENV: (&str, &str) = ("STNOUPGRADE", "1");

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read {}: {source}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to parse {}: {source}", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	#[serde(default)]
	pub supervisor: SupervisorConfig,
	#[serde(default)]
	pub provision: ProvisionConfig,
	#[serde(default = "default_sync_daemon")]
	pub sync_daemon: DaemonConfig,
	#[serde(default = "default_remote_daemon")]
	pub remote_daemon: DaemonConfig,
	#[serde(default)]
	pub api: ApiConfig,
	#[serde(default)]
	pub health: HealthConfig,
	#[serde(default)]
	pub logs: LogsConfig,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			supervisor: SupervisorConfig::default(),
			provision: ProvisionConfig::default(),
			sync_daemon: default_sync_daemon(),
			remote_daemon: default_remote_daemon(),
			api: ApiConfig::default(),
			health: HealthConfig::default(),
			logs: LogsConfig::default(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
	#[serde(default = "default_tick_interval")]
	pub tick_interval_ms: u64,
	#[serde(default = "default_grace_period")]
	pub grace_period_ms: u64,
	#[serde(default = "default_stop_timeout")]
	pub stop_timeout_ms: u64,
	#[serde(default = "default_max_starts")]
	pub max_starts: u32,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			tick_interval_ms: default_tick_interval(),
			grace_period_ms: default_grace_period(),
			stop_timeout_ms: default_stop_timeout(),
			max_starts: default_max_starts(),
		}
	}
}

impl SupervisorConfig {
	pub fn tick_interval(&self) -> Duration {
		Duration::from_millis(self.tick_interval_ms)
	}

	pub fn grace_period(&self) -> Duration {
		Duration::from_millis(self.grace_period_ms)
	}

	pub fn stop_timeout(&self) -> Duration {
		Duration::from_millis(self.stop_timeout_ms)
	}
}

fn default_tick_interval() -> u64 {
	1000
}
fn default_grace_period() -> u64 {
	5000
}
fn default_stop_timeout() -> u64 {
	10_000
}
fn default_max_starts() -> u32 {
	10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionConfig {
	#[serde(default = "default_source_dir")]
	pub source_dir: PathBuf,
	#[serde(default = "default_dest_dir")]
	pub dest_dir: PathBuf,
}

impl Default for ProvisionConfig {
	fn default() -> Self {
		Self {
			source_dir: default_source_dir(),
			dest_dir: default_dest_dir(),
		}
	}
}

fn default_source_dir() -> PathBuf {
	PathBuf::from("/var/syncthing/secret")
}
fn default_dest_dir() -> PathBuf {
	PathBuf::from("/var/syncthing/config")
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
	pub name: String,
	pub path: PathBuf,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default)]
	pub env: HashMap<String, String>,
	#[serde(default)]
	pub reset_args: Option<Vec<String>>,
}

fn default_sync_daemon() -> DaemonConfig {
	let home = default_dest_dir().display().to_string();
	DaemonConfig {
		name: "syncthing".into(),
		path: PathBuf::from("/var/berth/bin/syncthing"),
		args: vec![
			"-home".into(),
			home.clone(),
			"-gui-address".into(),
			"0.0.0.0:8384".into(),
			"-verbose".into(),
		],
		env: HashMap::new(),
		reset_args: Some(vec!["-home".into(), home, "-reset-database".into()]),
	}
}

fn default_remote_daemon() -> DaemonConfig {
	DaemonConfig {
		name: "berth-remote".into(),
		path: PathBuf::from("/var/berth/bin/berth-remote"),
		args: Vec::new(),
		env: HashMap::new(),
		reset_args: None,
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
	#[serde(default = "default_api_url")]
	pub url: String,
	#[serde(default = "default_api_key")]
	pub api_key: String,
	#[serde(default = "default_device_id")]
	pub device_id: String,
	#[serde(default = "default_api_timeout")]
	pub timeout_ms: u64,
}

impl Default for ApiConfig {
	fn default() -> Self {
		Self {
			url: default_api_url(),
			api_key: default_api_key(),
			device_id: default_device_id(),
			timeout_ms: default_api_timeout(),
		}
	}
}

impl ApiConfig {
	pub fn timeout(&self) -> Duration {
		Duration::from_millis(self.timeout_ms)
	}
}

fn default_api_url() -> String {
	"http://127.0.0.1:8384".into()
}
fn default_api_key() -> String {
	"berth".into()
}
fn default_device_id() -> String {
	"ATOPHFJ-VPVLDFY-QVZDCF2-OQQ7IOW-OG4DIXF-OA7RWU3-ZYA4S22-SI4XVAU".into()
}
fn default_api_timeout() -> u64 {
	2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
	#[serde(default = "default_health_interval")]
	pub interval_ms: u64,
	#[serde(default = "default_true")]
	pub primary: bool,
	/// Folders whose pull errors are watched alongside the ping.
	#[serde(default)]
	pub folders: Vec<String>,
	#[serde(default = "default_pull_retries")]
	pub max_pull_retries: u32,
}

impl Default for HealthConfig {
	fn default() -> Self {
		Self {
			interval_ms: default_health_interval(),
			primary: true,
			folders: Vec::new(),
			max_pull_retries: default_pull_retries(),
		}
	}
}

impl HealthConfig {
	pub fn interval(&self) -> Duration {
		Duration::from_millis(self.interval_ms)
	}
}

fn default_health_interval() -> u64 {
	5000
}
fn default_pull_retries() -> u32 {
	3
}
fn default_true() -> bool {
	true
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsConfig {
	#[serde(default = "default_level")]
	pub level: String,
}

impl Default for LogsConfig {
	fn default() -> Self {
		Self {
			level: default_level(),
		}
	}
}

fn default_level() -> String {
	"info".into()
}

impl Config {
	/// The file-sync daemon: provisioned before every start, launched with
	/// auto-upgrade disabled, and reset after fatal exits when `reset_args`
	/// is set.
	pub fn sync_daemon_spec(&self) -> ProcessSpec {
		let daemon = &self.sync_daemon;
		let mut env = daemon.env.clone();
		env.insert(NO_UPGRADE_ENV.0.into(), NO_UPGRADE_ENV.1.into());
		ProcessSpec {
			name: daemon.name.clone(),
			path: daemon.path.clone(),
			args: daemon.args.clone(),
			env,
			provision: true,
			reset_args: daemon.reset_args.clone(),
		}
	}

	pub fn remote_daemon_spec(&self) -> ProcessSpec {
		let daemon = &self.remote_daemon;
		ProcessSpec {
			name: daemon.name.clone(),
			path: daemon.path.clone(),
			args: daemon.args.clone(),
			env: daemon.env.clone(),
			provision: false,
			reset_args: daemon.reset_args.clone(),
		}
	}
}

/// Loads the config file at `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
	if !path.exists() {
		tracing::debug!("no config at {}, using defaults", path.display());
		return parse_config("", path);
	}
	let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
		path: path.to_path_buf(),
		source,
	})?;
	parse_config(&content, path)
}

fn parse_config(content: &str, path: &Path) -> Result<Config, ConfigError> {
	toml::from_str(content).map_err(|source| ConfigError::Parse {
		path: path.to_path_buf(),
		source,
	})
}
