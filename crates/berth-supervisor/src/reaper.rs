//! Terminates leftovers of a daemon before it is relaunched.
//!
//! The recorded process group of the last launch is always tried first. The
//! sync daemon forks a worker of the same name that can outlive its parent, so
//! a second pass walks the OS process table and terminates every process whose
//! name contains the daemon's name. That pass is a coarse substring match with
//! no locking: an unrelated process whose name contains the daemon's name is
//! killed too, so supervised names must be distinctive.

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use sysinfo::System;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const POLL_ATTEMPTS: u32 = 300;

#[derive(Clone, Copy, Debug)]
enum Target {
	Group(Pid),
	Process(Pid),
}

impl Target {
	fn signal(self, signal: Option<Signal>) -> nix::Result<()> {
		match self {
			Target::Group(pid) => killpg(pid, signal),
			Target::Process(pid) => kill(pid, signal),
		}
	}

	fn is_alive(self) -> bool {
		// EPERM still means something is there.
		!matches!(self.signal(None), Err(Errno::ESRCH))
	}
}

pub async fn kill_strays(name: &str, last_pid: Option<u32>) {
	tracing::info!(process = name, "killing stray processes");

	if let Some(pid) = last_pid {
		let group = Target::Group(Pid::from_raw(pid as i32));
		if group.is_alive() {
			tracing::info!(process = name, pid, "terminating process group of the last launch");
			if let Err(e) = terminate(group).await {
				tracing::warn!(process = name, pid, "error terminating process group: {}", e);
			}
		}
	}

	for pid in find_by_name(name).await {
		tracing::info!(process = name, pid, "terminating process by name");
		match terminate(Target::Process(Pid::from_raw(pid as i32))).await {
			Ok(()) => tracing::info!(process = name, pid, "terminated"),
			Err(e) => tracing::warn!(process = name, pid, "error terminating: {}", e),
		}
	}
}

/// Pids of every process, other than ourselves, whose name contains `name`.
pub async fn find_by_name(name: &str) -> Vec<u32> {
	let needle = name.to_string();
	let own = std::process::id();
	let scan = tokio::task::spawn_blocking(move || {
		let mut sys = System::new();
		sys.refresh_processes();
		sys.processes()
			.iter()
			.filter(|(pid, process)| {
				let pid = pid.as_u32();
				pid != 0 && pid != own && !process.name().is_empty() && process.name().contains(&needle)
			})
			.map(|(pid, _)| pid.as_u32())
			.collect::<Vec<_>>()
	});

	match scan.await {
		Ok(pids) => pids,
		Err(e) => {
			tracing::error!(process = name, "failed to list processes: {}", e);
			Vec::new()
		}
	}
}

async fn terminate(target: Target) -> nix::Result<()> {
	target.signal(Some(Signal::SIGTERM))?;
	if wait_until_gone(target).await {
		return Ok(());
	}
	target.signal(Some(Signal::SIGKILL))?;
	wait_until_gone(target).await;
	Ok(())
}

async fn wait_until_gone(target: Target) -> bool {
	for _ in 0..POLL_ATTEMPTS {
		if !target.is_alive() {
			return true;
		}
		tokio::time::sleep(POLL_INTERVAL).await;
	}
	!target.is_alive()
}
