use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Everything needed to launch one supervised daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessSpec {
	pub name: String,
	pub path: PathBuf,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default)]
	pub env: HashMap<String, String>,
	/// Run the provisioning step before every start.
	#[serde(default)]
	pub provision: bool,
	/// Arguments for a one-off run of `path` that wipes the daemon's local
	/// index. Only used after a fatal exit.
	#[serde(default)]
	pub reset_args: Option<Vec<String>>,
}

impl ProcessSpec {
	pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, args: Vec<String>) -> Self {
		Self {
			name: name.into(),
			path: path.into(),
			args,
			env: HashMap::new(),
			provision: false,
			reset_args: None,
		}
	}

	pub fn command_line(&self) -> String {
		let mut line = self.path.display().to_string();
		for arg in &self.args {
			line.push(' ');
			line.push_str(arg);
		}
		line
	}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
	NeverStarted,
	Started,
	Stopping,
	Stopped,
	Fatal,
}

impl ProcessState {
	pub fn is_running(&self) -> bool {
		matches!(self, ProcessState::Started | ProcessState::Stopping)
	}

	/// States from which the supervisor tick may relaunch the process.
	pub fn is_restartable(&self) -> bool {
		matches!(self, ProcessState::Stopped | ProcessState::Fatal)
	}
}

impl fmt::Display for ProcessState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ProcessState::NeverStarted => "never",
			ProcessState::Started => "started",
			ProcessState::Stopping => "stopping",
			ProcessState::Stopped => "stopped",
			ProcessState::Fatal => "fatal",
		};
		f.write_str(s)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessStatus {
	pub name: String,
	pub state: ProcessState,
	pub pid: Option<u32>,
	pub starts: u32,
	#[serde(default)]
	pub exhausted: bool,
}
