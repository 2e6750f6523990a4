use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
	#[error("failed to build http client: {0}")]
	Client(#[source] reqwest::Error),
	#[error("error calling '{endpoint}': {source}")]
	Transport {
		endpoint: String,
		#[source]
		source: reqwest::Error,
	},
	#[error("'{endpoint}' returned unexpected status {status}")]
	UnexpectedStatus { endpoint: String, status: u16 },
	#[error("failed to decode '{endpoint}': {source}")]
	Decode {
		endpoint: String,
		#[source]
		source: reqwest::Error,
	},
	#[error("sync daemon didn't respond after {0:?}")]
	NotReady(Duration),
	#[error("cancelled")]
	Cancelled,
	/// Local and remote stopped converging; the sync index must be rebuilt.
	#[error("synchronization stalled, the sync database needs a reset")]
	NeedsReset,
	#[error("insufficient space in folder '{folder}': {message}")]
	InsufficientSpace { folder: String, message: String },
	#[error("folder '{folder}' failed to sync: {message}")]
	PullErrors { folder: String, message: String },
}

impl SyncError {
	/// The daemon may be alive but too busy to answer in time.
	pub fn is_timeout(&self) -> bool {
		match self {
			SyncError::Transport { source, .. } => source.is_timeout(),
			_ => false,
		}
	}
}
