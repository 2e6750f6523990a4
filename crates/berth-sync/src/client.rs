//! REST transport for the sync daemon. Every call carries the static API key
//! and is bounded by the client's request timeout.

use std::time::{Duration, Instant};

use berth_core::config::ApiConfig;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::types::{Completion, Event, FolderStatus, SystemError, SystemErrors, FOLDER_ERRORS_EVENT};

pub const API_KEY_HEADER: &str = "X-API-Key";

const READY_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Filters for `/rest/events`.
#[derive(Debug, Clone)]
pub struct EventQuery {
	pub limit: usize,
	pub folder: String,
	pub device: String,
	/// Long-poll timeout in seconds; 0 returns immediately.
	pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SyncClient {
	client: Client,
	base_url: String,
	api_key: String,
}

impl SyncClient {
	pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, SyncError> {
		let client = Client::builder()
			.timeout(timeout)
			.build()
			.map_err(SyncError::Client)?;
		Ok(Self {
			client,
			base_url: base_url.trim_end_matches('/').to_string(),
			api_key: api_key.to_string(),
		})
	}

	pub fn from_config(config: &ApiConfig) -> Result<Self, SyncError> {
		Self::new(&config.url, &config.api_key, config.timeout())
	}

	pub fn base_url(&self) -> &str {
		&self.base_url
	}

	pub async fn ping(&self) -> Result<(), SyncError> {
		self.call(Method::GET, "rest/system/ping", &[]).await?;
		Ok(())
	}

	pub async fn completion(&self, folder: &str, device: &str) -> Result<Completion, SyncError> {
		self.get_json("rest/db/completion", &[("folder", folder), ("device", device)])
			.await
	}

	pub async fn events(&self, query: &EventQuery) -> Result<Vec<Event>, SyncError> {
		let limit = query.limit.to_string();
		let timeout = query.timeout_secs.to_string();
		self.get_json(
			"rest/events",
			&[
				("limit", limit.as_str()),
				("folder", query.folder.as_str()),
				("device", query.device.as_str()),
				("timeout", timeout.as_str()),
			],
		)
		.await
	}

	pub async fn folder_status(&self, folder: &str) -> Result<FolderStatus, SyncError> {
		self.get_json("rest/db/status", &[("folder", folder)]).await
	}

	/// The most recent `FolderErrors` event of `folder`, if any.
	pub async fn folder_errors(&self, folder: &str) -> Result<Option<Event>, SyncError> {
		let events: Vec<Event> = self
			.get_json(
				"rest/events",
				&[
					("folder", folder),
					("events", FOLDER_ERRORS_EVENT),
					("since", "0"),
					("limit", "1"),
					("timeout", "0"),
				],
			)
			.await?;
		Ok(events.into_iter().last())
	}

	pub async fn system_errors(&self, limit: usize) -> Result<Vec<SystemError>, SyncError> {
		let limit = limit.to_string();
		let body: SystemErrors = self
			.get_json("rest/system/error", &[("limit", limit.as_str())])
			.await?;
		Ok(body.errors.unwrap_or_default())
	}

	/// Makes the remote folder match the local one, discarding remote changes.
	pub async fn override_folder(&self, folder: &str) -> Result<(), SyncError> {
		self.call(Method::POST, "rest/db/override", &[("folder", folder)])
			.await?;
		Ok(())
	}

	pub async fn restart(&self) -> Result<(), SyncError> {
		self.call(Method::POST, "rest/system/restart", &[]).await?;
		Ok(())
	}

	/// Polls the ping endpoint until it answers, `timeout` passes, or
	/// `cancel` fires.
	pub async fn wait_for_ping(
		&self,
		timeout: Duration,
		cancel: &CancellationToken,
	) -> Result<(), SyncError> {
		let deadline = Instant::now() + timeout;
		tracing::info!("waiting for sync daemon at {} to be ready", self.base_url);

		let mut attempt: u32 = 0;
		loop {
			match self.ping().await {
				Ok(()) => return Ok(()),
				Err(e) if attempt % 5 == 0 => tracing::info!("sync daemon is not ready yet: {}", e),
				Err(e) => tracing::debug!("sync daemon is not ready yet: {}", e),
			}

			if Instant::now() >= deadline {
				return Err(SyncError::NotReady(timeout));
			}

			tokio::select! {
				_ = cancel.cancelled() => return Err(SyncError::Cancelled),
				_ = tokio::time::sleep(READY_POLL_INTERVAL) => {}
			}
			attempt = attempt.wrapping_add(1);
		}
	}

	async fn get_json<T: DeserializeOwned>(
		&self,
		endpoint: &str,
		query: &[(&str, &str)],
	) -> Result<T, SyncError> {
		let resp = self.call(Method::GET, endpoint, query).await?;
		resp.json::<T>().await.map_err(|source| SyncError::Decode {
			endpoint: endpoint.to_string(),
			source,
		})
	}

	async fn call(
		&self,
		method: Method,
		endpoint: &str,
		query: &[(&str, &str)],
	) -> Result<reqwest::Response, SyncError> {
		let url = format!("{}/{}", self.base_url, endpoint);
		tracing::trace!("{} {}", method, url);

		let resp = self
			.client
			.request(method, &url)
			.header(API_KEY_HEADER, &self.api_key)
			.query(query)
			.send()
			.await
			.map_err(|source| SyncError::Transport {
				endpoint: endpoint.to_string(),
				source,
			})?;

		if resp.status() != StatusCode::OK {
			return Err(SyncError::UnexpectedStatus {
				endpoint: endpoint.to_string(),
				status: resp.status().as_u16(),
			});
		}
		Ok(resp)
	}
}
