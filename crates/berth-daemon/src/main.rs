mod args;

use std::process::ExitCode;

use anyhow::Context;
use berth_core::config::{self, Config};
use berth_core::logs;
use berth_supervisor::{Provisioner, Supervisor};
use berth_sync::{HealthMonitor, SyncClient};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::args::{Mode, Options, USAGE};

#[tokio::main]
async fn main() -> ExitCode {
	let opts = match Options::parse(std::env::args().skip(1)) {
		Ok(opts) => opts,
		Err(e) => {
			eprintln!("{}\n{}", e, USAGE);
			return ExitCode::from(2);
		}
	};

	let config = match config::load_config(&opts.config) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("{}", e);
			return ExitCode::FAILURE;
		}
	};
	logs::init(&logs::level_for(opts.verbose, &config.logs.level));

	let result = match opts.mode {
		Mode::Supervise => supervise(&opts, config).await,
		Mode::Watch => watch(config).await,
	};
	match result {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			tracing::error!("{:#}", e);
			ExitCode::FAILURE
		}
	}
}

async fn supervise(opts: &Options, config: Config) -> anyhow::Result<()> {
	let provisioner = Provisioner::from_config(&config.provision);
	let mut supervisor = Supervisor::new(config.supervisor.clone(), Some(provisioner));
	supervisor
		.register(config.sync_daemon_spec())
		.context("failed to register the sync daemon")?;
	if opts.remote {
		supervisor
			.register(config.remote_daemon_spec())
			.context("failed to register the remote daemon")?;
	}

	if opts.reset {
		tracing::info!("resetting local indexes");
		supervisor.reset_indexes().await;
	}

	let cancel = shutdown_token()?;
	tracing::info!("berth-daemon started (pid {})", std::process::id());
	let result = supervisor.run(cancel).await;

	tracing::info!("shutting down");
	supervisor.stop().await;
	result.context("supervisor failed")
}

async fn watch(config: Config) -> anyhow::Result<()> {
	let client = SyncClient::from_config(&config.api).context("failed to create sync client")?;
	let monitor = HealthMonitor::from_config(client, &config.health);

	let cancel = shutdown_token()?;
	let (disconnected, handle) = monitor.spawn(cancel);

	// the sender is dropped without a value on cancellation
	let outcome = disconnected.await;
	let _ = handle.await;
	match outcome {
		Ok(d) => anyhow::bail!("sync session is broken ({:?}): {}", d.kind, d.reason),
		Err(_) => {
			tracing::info!("shutting down");
			Ok(())
		}
	}
}

/// A token cancelled on the first SIGINT or SIGTERM.
fn shutdown_token() -> anyhow::Result<CancellationToken> {
	let mut terminate = signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;
	let cancel = CancellationToken::new();
	let trigger = cancel.clone();
	tokio::spawn(async move {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {}
			_ = terminate.recv() => {}
		}
		tracing::info!("received shutdown signal");
		trigger.cancel();
	});
	Ok(cancel)
}
