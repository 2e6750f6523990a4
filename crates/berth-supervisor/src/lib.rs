//! # berth-supervisor
//!
//! Keeps the daemons of a remote dev container running: the file-sync daemon
//! and the remote exec daemon.
//!
//! Each process moves through `NeverStarted → Started → Stopped | Fatal`. The
//! [`Supervisor`] ticks on a fixed interval, relaunches stopped or fatal
//! processes (killing leftovers, re-provisioning, and resetting the sync
//! index after a fatal exit) and gives up on the whole session as soon as one
//! process exhausts its start budget.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use berth_core::config::SupervisorConfig;
//! use berth_core::types::ProcessSpec;
//! use berth_supervisor::{Provisioner, Supervisor};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let provisioner = Provisioner::new("/var/syncthing/secret", "/var/syncthing/config");
//! let mut sup = Supervisor::new(SupervisorConfig::default(), Some(provisioner));
//!
//! let mut syncthing = ProcessSpec::new(
//!     "syncthing",
//!     "/var/berth/bin/syncthing",
//!     vec!["-home".into(), "/var/syncthing/config".into()],
//! );
//! syncthing.provision = true;
//! sup.register(syncthing).unwrap();
//!
//! let cancel = CancellationToken::new();
//! if let Err(e) = sup.run(cancel).await {
//!     eprintln!("session is unusable: {}", e);
//! }
//! sup.stop().await;
//! # }
//! ```

pub mod error;
pub mod monitor;
pub mod output;
pub mod process;
pub mod provision;
pub mod reaper;

pub use error::{ProcessError, ProvisionError, SupervisorError};
pub use monitor::Supervisor;
pub use output::OutputCapture;
pub use process::SupervisedProcess;
pub use provision::Provisioner;
