use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
	/// The secret material the daemon needs is not there.
	#[error("{reason}: {}", path.display())]
	Setup { path: PathBuf, reason: String },
	#[error("failed to {action} {}: {source}", path.display())]
	Permission {
		path: PathBuf,
		action: &'static str,
		#[source]
		source: std::io::Error,
	},
}

#[derive(Debug, Error)]
pub enum ProcessError {
	#[error("process {name} didn't start: {reason}")]
	Start { name: String, reason: String },
	#[error("process {name} exited with error: {reason}")]
	Runtime { name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SupervisorError {
	#[error("process {name} exceeded its restart budget after {starts} starts")]
	RetryBudgetExhausted { name: String, starts: u32 },
	#[error("process {0} is already registered")]
	DuplicateProcess(String),
	#[error("failed to provision {name}: {source}")]
	Provision {
		name: String,
		#[source]
		source: ProvisionError,
	},
	#[error("supervisor worker for {name} failed: {reason}")]
	Worker { name: String, reason: String },
}
