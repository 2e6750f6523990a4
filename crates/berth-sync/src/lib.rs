//! Local side of a dev session: talks to the sync daemon's REST API to tell
//! whether the connection is alive and whether a folder finished syncing.

pub mod client;
pub mod completion;
pub mod error;
pub mod health;
pub mod status;
pub mod types;

pub use client::{EventQuery, SyncClient, API_KEY_HEADER};
pub use completion::{folder_key, CompletionSource, CompletionTracker, FolderCompletion};
pub use error::SyncError;
pub use health::{DisconnectKind, Disconnected, HealthMonitor};
pub use status::FolderHealth;
