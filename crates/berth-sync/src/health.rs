//! Watches the connection to the remote sync daemon from the local side.
//!
//! The monitor pings the daemon every interval. One failed ping is checked
//! again right away so a single blip never tears the session down; two failed
//! pings in a row send [`Disconnected`] once and end the monitor. A ping that
//! times out means the daemon is alive but busy and counts as healthy.
//!
//! When folders are watched, every healthy tick also checks their pull errors
//! and reports a folder that exhausts its retry budget on the same signal.

use std::time::Duration;

use berth_core::config::HealthConfig;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::SyncClient;
use crate::error::SyncError;
use crate::status::FolderHealth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
	/// The daemon stopped answering.
	Unreachable,
	/// A watched folder ran out of disk space.
	InsufficientSpace,
	/// A watched folder kept failing to pull.
	SyncError,
}

/// Sent once when the session can no longer sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnected {
	pub kind: DisconnectKind,
	pub reason: String,
}

impl Disconnected {
	fn from_error(err: &SyncError) -> Self {
		let kind = match err {
			SyncError::InsufficientSpace { .. } => DisconnectKind::InsufficientSpace,
			SyncError::PullErrors { .. } => DisconnectKind::SyncError,
			_ => DisconnectKind::Unreachable,
		};
		Self {
			kind,
			reason: err.to_string(),
		}
	}
}

pub struct HealthMonitor {
	client: SyncClient,
	interval: Duration,
	primary: bool,
	folders: Vec<String>,
	folder_health: FolderHealth,
}

impl HealthMonitor {
	/// Non-primary monitors never touch the network and always report healthy.
	pub fn new(client: SyncClient, interval: Duration, primary: bool) -> Self {
		Self {
			client,
			interval,
			primary,
			folders: Vec::new(),
			folder_health: FolderHealth::new(crate::status::DEFAULT_PULL_RETRIES),
		}
	}

	pub fn from_config(client: SyncClient, config: &HealthConfig) -> Self {
		Self::new(client, config.interval(), config.primary)
			.watch_folders(config.folders.clone(), config.max_pull_retries)
	}

	/// Also checks pull errors of `folders`, giving up on a folder after
	/// `max_retries` consecutive failing checks.
	pub fn watch_folders(mut self, folders: Vec<String>, max_retries: u32) -> Self {
		self.folders = folders;
		self.folder_health = FolderHealth::new(max_retries);
		self
	}

	pub fn spawn(self, cancel: CancellationToken) -> (oneshot::Receiver<Disconnected>, JoinHandle<()>) {
		let (tx, rx) = oneshot::channel();
		let handle = tokio::spawn(self.run(cancel, tx));
		(rx, handle)
	}

	pub async fn run(mut self, cancel: CancellationToken, disconnect: oneshot::Sender<Disconnected>) {
		tracing::debug!(primary = self.primary, "health monitor started for {}", self.client.base_url());
		loop {
			tokio::select! {
				_ = cancel.cancelled() => {
					tracing::debug!("health monitor cancelled");
					return;
				}
				_ = tokio::time::sleep(self.interval) => {}
			}

			if let Err(signal) = self.check().await {
				tracing::error!("sync session is broken: {}", signal.reason);
				let _ = disconnect.send(signal);
				return;
			}
		}
	}

	async fn check(&mut self) -> Result<(), Disconnected> {
		if !self.primary {
			return Ok(());
		}
		self.ping_twice().await.map_err(|e| Disconnected::from_error(&e))?;
		if self.folders.is_empty() {
			return Ok(());
		}
		self.folder_health
			.check(&self.client, &self.folders)
			.await
			.map_err(|e| Disconnected::from_error(&e))
	}

	async fn ping_twice(&self) -> Result<(), SyncError> {
		let Err(first) = self.ping().await else {
			return Ok(());
		};
		tracing::warn!("ping failed, checking again: {}", first);
		self.ping().await
	}

	async fn ping(&self) -> Result<(), SyncError> {
		match self.client.ping().await {
			Err(e) if e.is_timeout() => {
				tracing::warn!("sync daemon is busy: {}", e);
				Ok(())
			}
			other => other,
		}
	}
}
