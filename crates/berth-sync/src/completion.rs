use std::time::Duration;

use berth_core::config::ApiConfig;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::{EventQuery, SyncClient};
use crate::error::SyncError;
use crate::status::{FolderHealth, DEFAULT_PULL_RETRIES};
use crate::types::{Completion, Event, FolderCompletionData};

pub const EVENT_LIMIT: usize = 30;
pub const ERROR_LIMIT: usize = 10;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Polls between two folder health checks while waiting.
const HEALTH_CHECK_EVERY: u64 = 40;
/// Consecutive polls with diverging, unchanging global bytes before the sync
/// is declared stalled.
const STALL_LIMIT: u32 = 360;
/// Polls tolerated with pending deletes once everything else matches.
const NEED_DELETES_LIMIT: u32 = 50;

/// Where a reported completion came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSource {
	/// `/rest/db/completion` said 100.
	Direct,
	/// Newest informative `FolderCompletion` event.
	Event,
	/// Nothing informative was found. Reported as 100, which cannot be told
	/// apart from a sync that stalled before emitting any event.
	Assumed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FolderCompletion {
	pub folder: String,
	pub completion: f64,
	pub need_bytes: i64,
	pub source: CompletionSource,
}

impl FolderCompletion {
	pub fn is_complete(&self) -> bool {
		self.completion >= 100.0
	}
}

/// Key of the folder that pairs a dev environment's container with the
/// workstation.
pub fn folder_key(namespace: &str, name: &str) -> String {
	format!("berth-{}-{}", namespace, name)
}

/// Answers "has the transfer finished?" for a folder, asking the remote
/// daemon each time.
pub struct CompletionTracker {
	client: SyncClient,
	device_id: String,
	poll_interval: Duration,
}

impl CompletionTracker {
	pub fn new(client: SyncClient, device_id: impl Into<String>) -> Self {
		Self {
			client,
			device_id: device_id.into(),
			poll_interval: POLL_INTERVAL,
		}
	}

	pub fn with_poll_interval(mut self, interval: Duration) -> Self {
		self.poll_interval = interval;
		self
	}

	pub fn from_config(client: SyncClient, config: &ApiConfig) -> Self {
		Self::new(client, config.device_id.clone())
	}

	pub async fn completion(&self, folder: &str) -> Result<FolderCompletion, SyncError> {
		let direct = self.client.completion(folder, &self.device_id).await?;
		if direct.completion >= 100.0 {
			return Ok(FolderCompletion {
				folder: folder.to_string(),
				completion: 100.0,
				need_bytes: direct.need_bytes,
				source: CompletionSource::Direct,
			});
		}
		tracing::debug!(folder, "folder is {:.2}%, checking events", direct.completion);

		let events = self
			.client
			.events(&EventQuery {
				limit: EVENT_LIMIT,
				folder: folder.to_string(),
				device: self.device_id.clone(),
				timeout_secs: 0,
			})
			.await?;

		match latest_informative(&events, folder) {
			Some(data) => {
				tracing::debug!(
					folder,
					"folder completion event: {:.2}%, needBytes {}",
					data.completion,
					data.need_bytes
				);
				Ok(FolderCompletion {
					folder: folder.to_string(),
					completion: data.completion,
					need_bytes: data.need_bytes,
					source: CompletionSource::Event,
				})
			}
			None => {
				tracing::warn!(
					folder,
					"no completion event with data in the last {} events, assuming complete",
					EVENT_LIMIT
				);
				Ok(FolderCompletion {
					folder: folder.to_string(),
					completion: 100.0,
					need_bytes: 0,
					source: CompletionSource::Assumed,
				})
			}
		}
	}

	/// Waits until the local and remote daemons agree that `folder` is fully
	/// synced, publishing local progress in percent on `progress`.
	///
	/// The local side's folder is overridden first so the remote matches it.
	/// Returns [`SyncError::NeedsReset`] when the two sides stop converging,
	/// and the folder health error when the remote keeps failing to pull.
	pub async fn wait_for_completion(
		&self,
		local: &SyncClient,
		folder: &str,
		progress: &watch::Sender<f64>,
		cancel: &CancellationToken,
	) -> Result<(), SyncError> {
		let folders = [folder.to_string()];
		let mut health = FolderHealth::new(DEFAULT_PULL_RETRIES);
		let mut wait = WaitState::default();
		let mut overwritten = false;
		let mut polls: u64 = 0;

		loop {
			tokio::select! {
				_ = cancel.cancelled() => {
					tracing::info!(folder, "wait for completion cancelled");
					return Err(SyncError::Cancelled);
				}
				_ = tokio::time::sleep(self.poll_interval) => {}
			}
			polls += 1;

			if polls % HEALTH_CHECK_EVERY == 0 {
				tracing::debug!(folder, "checking sync daemon for errors");
				health.check(&self.client, &folders).await?;
			}

			if !overwritten {
				match local.override_folder(folder).await {
					Ok(()) => overwritten = true,
					Err(e) if e.is_timeout() => {}
					Err(e) => return Err(e),
				}
			}

			let (local_side, remote_side) = match self.both_sides(local, folder).await {
				Ok(sides) => sides,
				Err(e) if e.is_timeout() => continue,
				Err(e) => return Err(e),
			};

			progress.send_replace(percent(&local_side));

			if wait.needs_reset(&local_side, &remote_side) {
				tracing::warn!(folder, "synchronization stalled");
				return Err(SyncError::NeedsReset);
			}
			if wait.is_completed(&local_side, &remote_side, overwritten) {
				tracing::info!(folder, "synchronization completed");
				return Ok(());
			}
		}
	}

	async fn both_sides(&self, local: &SyncClient, folder: &str) -> Result<(Completion, Completion), SyncError> {
		let local_side = local.completion(folder, &self.device_id).await?;
		tracing::debug!(
			folder,
			"local: globalBytes {}, needBytes {}, needDeletes {}",
			local_side.global_bytes,
			local_side.need_bytes,
			local_side.need_deletes
		);
		let remote_side = self.client.completion(folder, &self.device_id).await?;
		tracing::debug!(
			folder,
			"remote: globalBytes {}, needBytes {}, needDeletes {}",
			remote_side.global_bytes,
			remote_side.need_bytes,
			remote_side.need_deletes
		);
		Ok((local_side, remote_side))
	}

	/// Recent daemon errors, without their leading prefix.
	pub async fn errors(&self) -> Result<Vec<String>, SyncError> {
		let errors = self.client.system_errors(ERROR_LIMIT).await?;
		Ok(errors.iter().map(|e| strip_error_prefix(&e.message)).collect())
	}
}

/// Share of the folder already in place, 100 for an empty folder.
fn percent(completion: &Completion) -> f64 {
	if completion.global_bytes == 0 {
		return 100.0;
	}
	(completion.global_bytes - completion.need_bytes) as f64 / completion.global_bytes as f64 * 100.0
}

/// Bookkeeping across the polls of one wait.
#[derive(Debug, Default, Clone, PartialEq)]
struct WaitState {
	previous_local_global: i64,
	previous_remote_global: i64,
	stalled_polls: u32,
	need_deletes_polls: u32,
}

impl WaitState {
	/// True once global bytes have disagreed, without either side moving,
	/// for more than the stall limit.
	fn needs_reset(&mut self, local: &Completion, remote: &Completion) -> bool {
		let moved = local.global_bytes == remote.global_bytes
			|| local.global_bytes != self.previous_local_global
			|| remote.global_bytes != self.previous_remote_global;
		if moved {
			self.previous_local_global = local.global_bytes;
			self.previous_remote_global = remote.global_bytes;
			self.stalled_polls = 0;
			return false;
		}
		self.stalled_polls += 1;
		self.stalled_polls > STALL_LIMIT
	}

	fn is_completed(&mut self, local: &Completion, remote: &Completion, overwritten: bool) -> bool {
		if local.need_bytes != remote.need_bytes || local.need_bytes > 0 {
			return false;
		}
		if local.global_bytes != remote.global_bytes {
			return false;
		}
		if local.need_deletes > 0 {
			self.need_deletes_polls += 1;
			if self.need_deletes_polls < NEED_DELETES_LIMIT {
				tracing::debug!("synced, but deletes are still pending");
				return false;
			}
		}
		if !overwritten {
			tracing::debug!("synced, but the folder override wasn't sent yet");
			return false;
		}
		true
	}
}

/// The newest `FolderCompletion` event for `folder` whose global bytes are
/// known. Events are ordered by id, whatever order the daemon sent them in.
fn latest_informative(events: &[Event], folder: &str) -> Option<FolderCompletionData> {
	let mut matching: Vec<(u64, FolderCompletionData)> = events
		.iter()
		.filter_map(|e| e.folder_completion().map(|data| (e.id, data)))
		.filter(|(_, data)| data.folder == folder)
		.collect();
	matching.sort_by(|a, b| b.0.cmp(&a.0));
	matching
		.into_iter()
		.map(|(_, data)| data)
		.find(|data| data.global_bytes != 0)
}

fn strip_error_prefix(message: &str) -> String {
	match message.split_once(':') {
		Some((_, rest)) => rest.trim_start().to_string(),
		None => message.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn completion_event(id: u64, folder: &str, completion: f64, global_bytes: i64) -> Event {
		serde_json::from_value(json!({
			"id": id,
			"type": "FolderCompletion",
			"data": {
				"folder": folder,
				"device": "DEV",
				"completion": completion,
				"globalBytes": global_bytes,
				"needBytes": 10,
			}
		}))
		.unwrap()
	}

	#[test]
	fn newest_event_wins() {
		let events = vec![
			completion_event(1, "berth-a", 10.0, 100),
			completion_event(2, "berth-a", 60.0, 100),
		];
		assert_eq!(latest_informative(&events, "berth-a").unwrap().completion, 60.0);
	}

	#[test]
	fn order_on_the_wire_does_not_matter() {
		let events = vec![
			completion_event(9, "berth-a", 90.0, 100),
			completion_event(3, "berth-a", 30.0, 100),
		];
		assert_eq!(latest_informative(&events, "berth-a").unwrap().completion, 90.0);
	}

	#[test]
	fn zero_global_bytes_falls_back_to_older_event() {
		let events = vec![
			completion_event(1, "berth-a", 40.0, 100),
			completion_event(2, "berth-a", 0.0, 0),
		];
		assert_eq!(latest_informative(&events, "berth-a").unwrap().completion, 40.0);
	}

	#[test]
	fn other_folders_are_ignored() {
		let events = vec![completion_event(1, "berth-b", 40.0, 100)];
		assert!(latest_informative(&events, "berth-a").is_none());
	}

	#[test]
	fn error_prefix_is_stripped() {
		assert_eq!(strip_error_prefix("1: insufficient space"), "insufficient space");
		assert_eq!(
			strip_error_prefix("folder berth-a: puller: permission denied"),
			"puller: permission denied"
		);
		assert_eq!(strip_error_prefix("no prefix here"), "no prefix here");
	}

	fn sides(local: (i64, i64, i64), remote: (i64, i64)) -> (Completion, Completion) {
		let side = |global_bytes, need_bytes, need_deletes| Completion {
			completion: 0.0,
			global_bytes,
			need_bytes,
			need_deletes,
		};
		(side(local.0, local.1, local.2), side(remote.0, remote.1, 0))
	}

	fn state(local: i64, remote: i64, stalled: u32) -> WaitState {
		WaitState {
			previous_local_global: local,
			previous_remote_global: remote,
			stalled_polls: stalled,
			need_deletes_polls: 0,
		}
	}

	#[test]
	fn matching_global_bytes_reset_the_stall_counter() {
		let (l, r) = sides((10, 0, 0), (10, 0));
		let mut wait = state(0, 0, 10);
		assert!(!wait.needs_reset(&l, &r));
		assert_eq!(wait, state(10, 10, 0));
	}

	#[test]
	fn local_progress_resets_the_stall_counter() {
		let (l, r) = sides((10, 0, 0), (20, 0));
		let mut wait = state(1, 20, 10);
		assert!(!wait.needs_reset(&l, &r));
		assert_eq!(wait, state(10, 20, 0));
	}

	#[test]
	fn remote_progress_resets_the_stall_counter() {
		let (l, r) = sides((10, 0, 0), (20, 0));
		let mut wait = state(10, 2, 10);
		assert!(!wait.needs_reset(&l, &r));
		assert_eq!(wait, state(10, 20, 0));
	}

	#[test]
	fn unchanged_mismatch_counts_as_stalled() {
		let (l, r) = sides((10, 0, 0), (20, 0));
		let mut wait = state(10, 20, 10);
		assert!(!wait.needs_reset(&l, &r));
		assert_eq!(wait, state(10, 20, 11));
	}

	#[test]
	fn long_stall_needs_reset() {
		let (l, r) = sides((10, 0, 0), (20, 0));
		let mut wait = state(10, 20, STALL_LIMIT);
		assert!(wait.needs_reset(&l, &r));
		assert_eq!(wait, state(10, 20, STALL_LIMIT + 1));
	}

	#[test]
	fn pending_bytes_are_not_complete() {
		let (l, r) = sides((0, 10, 0), (0, 10));
		let mut wait = WaitState::default();
		assert!(!wait.is_completed(&l, &r, true));
		assert_eq!(wait.need_deletes_polls, 0);
	}

	#[test]
	fn diverging_global_bytes_are_not_complete() {
		let (l, r) = sides((10, 0, 0), (20, 0));
		assert!(!WaitState::default().is_completed(&l, &r, true));
	}

	#[test]
	fn diverging_need_bytes_are_not_complete() {
		let (l, r) = sides((0, 0, 0), (0, 10));
		assert!(!WaitState::default().is_completed(&l, &r, true));
	}

	#[test]
	fn pending_deletes_are_retried() {
		let (l, r) = sides((10, 0, 10), (10, 0));
		let mut wait = WaitState::default();
		assert!(!wait.is_completed(&l, &r, true));
		assert_eq!(wait.need_deletes_polls, 1);
	}

	#[test]
	fn pending_deletes_give_up_after_the_limit() {
		let (l, r) = sides((10, 0, 10), (10, 0));
		let mut wait = WaitState {
			need_deletes_polls: NEED_DELETES_LIMIT,
			..WaitState::default()
		};
		assert!(wait.is_completed(&l, &r, true));
		assert_eq!(wait.need_deletes_polls, NEED_DELETES_LIMIT + 1);
	}

	#[test]
	fn missing_override_is_not_complete() {
		let (l, r) = sides((10, 0, 0), (10, 0));
		let mut wait = WaitState::default();
		assert!(!wait.is_completed(&l, &r, false));
		assert!(wait.is_completed(&l, &r, true));
	}

	#[test]
	fn percent_of_local_side() {
		let (empty, half) = (sides((0, 0, 0), (0, 0)).0, sides((200, 100, 0), (0, 0)).0);
		assert_eq!(percent(&empty), 100.0);
		assert_eq!(percent(&half), 50.0);
	}

	#[test]
	fn folder_key_joins_identity() {
		assert_eq!(folder_key("dev", "api"), "berth-dev-api");
	}
}
