use serde::Deserialize;

pub const FOLDER_COMPLETION_EVENT: &str = "FolderCompletion";
pub const FOLDER_ERRORS_EVENT: &str = "FolderErrors";

/// Response of `/rest/db/completion`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
	pub completion: f64,
	#[serde(default)]
	pub global_bytes: i64,
	#[serde(default)]
	pub need_bytes: i64,
	#[serde(default)]
	pub need_deletes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Event {
	pub id: u64,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub data: serde_json::Value,
}

impl Event {
	/// The payload of a `FolderCompletion` event, `None` for other types.
	pub fn folder_completion(&self) -> Option<FolderCompletionData> {
		if self.kind != FOLDER_COMPLETION_EVENT {
			return None;
		}
		serde_json::from_value(self.data.clone()).ok()
	}

	/// The payload of a `FolderErrors` event, `None` for other types.
	pub fn folder_errors(&self) -> Option<FolderErrorsData> {
		if self.kind != FOLDER_ERRORS_EVENT {
			return None;
		}
		serde_json::from_value(self.data.clone()).ok()
	}
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FolderCompletionData {
	pub folder: String,
	#[serde(default)]
	pub device: String,
	pub completion: f64,
	#[serde(default)]
	pub global_bytes: i64,
	#[serde(default)]
	pub need_bytes: i64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FolderErrorsData {
	#[serde(default)]
	pub folder: String,
	#[serde(default)]
	pub errors: Vec<FolderError>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FolderError {
	pub error: String,
	#[serde(default)]
	pub path: String,
}

/// Response of `/rest/db/status`, reduced to what health checks need.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FolderStatus {
	#[serde(default)]
	pub state: String,
	#[serde(default)]
	pub pull_errors: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SystemErrors {
	#[serde(default)]
	pub errors: Option<Vec<SystemError>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemError {
	pub message: String,
	#[serde(default)]
	pub when: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn folder_completion_payload() {
		let event: Event = serde_json::from_str(
			r#"{"id": 7, "type": "FolderCompletion", "time": "2024-01-01T00:00:00Z",
			"data": {"folder": "berth-dev", "device": "ABC", "completion": 42.5, "globalBytes": 2048, "needBytes": 1024}}"#,
		)
		.unwrap();
		let data = event.folder_completion().unwrap();
		assert_eq!(data.folder, "berth-dev");
		assert_eq!(data.completion, 42.5);
		assert_eq!(data.global_bytes, 2048);
		assert_eq!(data.need_bytes, 1024);
	}

	#[test]
	fn other_event_types_have_no_completion() {
		let event: Event = serde_json::from_str(
			r#"{"id": 8, "type": "StateChanged", "data": {"folder": "berth-dev", "to": "idle"}}"#,
		)
		.unwrap();
		assert!(event.folder_completion().is_none());
	}

	#[test]
	fn folder_errors_payload() {
		let event: Event = serde_json::from_str(
			r#"{"id": 9, "type": "FolderErrors",
			"data": {"folder": "berth-dev", "errors": [{"error": "insufficient space", "path": "big.bin"}]}}"#,
		)
		.unwrap();
		let data = event.folder_errors().unwrap();
		assert_eq!(data.errors.len(), 1);
		assert_eq!(data.errors[0].path, "big.bin");
		assert!(event.folder_completion().is_none());
	}

	#[test]
	fn folder_status_pull_errors() {
		let status: FolderStatus =
			serde_json::from_str(r#"{"state": "syncing", "pullErrors": 2, "globalBytes": 10}"#).unwrap();
		assert_eq!(status.pull_errors, 2);
		assert_eq!(status.state, "syncing");
	}

	#[test]
	fn null_error_list() {
		let errors: SystemErrors = serde_json::from_str(r#"{"errors": null}"#).unwrap();
		assert!(errors.errors.is_none());
	}
}
