//! Per-folder sync health: a folder that keeps reporting pull errors past its
//! retry budget is a broken session, not a transient hiccup.

use std::collections::HashMap;

use crate::client::SyncClient;
use crate::error::SyncError;

pub const DEFAULT_PULL_RETRIES: u32 = 3;

const INSUFFICIENT_SPACE: &str = "insufficient space";

/// Counts consecutive checks with pull errors for each folder.
#[derive(Debug, Clone)]
pub struct FolderHealth {
	max_retries: u32,
	retries: HashMap<String, u32>,
}

impl FolderHealth {
	pub fn new(max_retries: u32) -> Self {
		Self {
			max_retries,
			retries: HashMap::new(),
		}
	}

	pub fn retries(&self, folder: &str) -> u32 {
		self.retries.get(folder).copied().unwrap_or(0)
	}

	/// Checks every folder once. A busy daemon (request timeout) is skipped;
	/// any other transport failure is returned as is.
	pub async fn check(&mut self, client: &SyncClient, folders: &[String]) -> Result<(), SyncError> {
		for folder in folders {
			let status = match client.folder_status(folder).await {
				Ok(status) => status,
				Err(e) if e.is_timeout() => {
					tracing::debug!(folder = %folder, "sync daemon is busy, skipping status check");
					continue;
				}
				Err(e) => return Err(e),
			};

			if status.pull_errors == 0 {
				self.retries.insert(folder.clone(), 0);
				continue;
			}

			let failure = match client.folder_errors(folder).await {
				Ok(event) => event
					.and_then(|e| e.folder_errors())
					.and_then(|data| data.errors.into_iter().next())
					.map(|err| classify(folder, &err.path, &err.error)),
				Err(e) if e.is_timeout() => None,
				Err(e) => return Err(e),
			};

			let retries = self.retries.entry(folder.clone()).or_insert(0);
			*retries += 1;
			tracing::info!(
				folder = %folder,
				retries = *retries,
				"folder has {} pull errors",
				status.pull_errors
			);
			if *retries <= self.max_retries {
				continue;
			}

			return Err(failure.unwrap_or_else(|| SyncError::PullErrors {
				folder: folder.clone(),
				message: "unknown sync error".into(),
			}));
		}
		Ok(())
	}
}

fn classify(folder: &str, path: &str, message: &str) -> SyncError {
	if message.contains(INSUFFICIENT_SPACE) {
		return SyncError::InsufficientSpace {
			folder: folder.to_string(),
			message: message.to_string(),
		};
	}
	let message = if path.is_empty() {
		message.to_string()
	} else {
		format!("{}: {}", path, message)
	};
	SyncError::PullErrors {
		folder: folder.to_string(),
		message,
	}
}
