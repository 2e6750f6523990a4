use std::collections::HashMap;
use std::sync::Arc;

use berth_core::config::SupervisorConfig;
use berth_core::types::{ProcessSpec, ProcessState, ProcessStatus};
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::SupervisorError;
use crate::process::SupervisedProcess;
use crate::provision::Provisioner;
use crate::reaper;

/// Restart policy shared by the workers of one tick.
struct Policy {
	config: SupervisorConfig,
	provisioner: Option<Provisioner>,
}

impl Policy {
	async fn check(&self, process: &mut SupervisedProcess) -> Result<(), SupervisorError> {
		if process.is_exhausted() {
			return Ok(());
		}
		process.poll_exit().await;

		let state = process.state();
		match state {
			ProcessState::NeverStarted => {
				self.provision(process)?;
				let _ = process.start(&self.config).await;
				Ok(())
			}
			state if state.is_restartable() => {
				let starts = process.starts();
				if starts >= self.config.max_starts {
					process.mark_exhausted();
					tracing::error!(
						process = process.name(),
						starts,
						"process reached its restart budget, giving up"
					);
					return Err(SupervisorError::RetryBudgetExhausted {
						name: process.name().to_string(),
						starts,
					});
				}

				tracing::warn!(
					process = process.name(),
					starts,
					max = self.config.max_starts,
					"process is {}, restarting",
					state
				);
				reaper::kill_strays(process.name(), process.last_pid()).await;
				self.provision(process)?;
				if state == ProcessState::Fatal {
					process.reset_index().await;
				}
				// a failed start leaves the process fatal for the next tick
				let _ = process.start(&self.config).await;
				Ok(())
			}
			_ => Ok(()),
		}
	}

	fn provision(&self, process: &SupervisedProcess) -> Result<(), SupervisorError> {
		if !process.spec().provision {
			return Ok(());
		}
		let Some(provisioner) = &self.provisioner else {
			return Ok(());
		};
		provisioner.provision().map_err(|source| {
			tracing::error!(process = process.name(), "provisioning failed: {}", source);
			SupervisorError::Provision {
				name: process.name().to_string(),
				source,
			}
		})
	}
}

/// Keeps a fixed set of daemons alive. Every tick checks all of them in
/// parallel and waits for every check before sleeping again; the first process
/// to exhaust its restart budget ends the run.
pub struct Supervisor {
	processes: Vec<SupervisedProcess>,
	policy: Arc<Policy>,
}

impl Supervisor {
	pub fn new(config: SupervisorConfig, provisioner: Option<Provisioner>) -> Self {
		Self {
			processes: Vec::new(),
			policy: Arc::new(Policy {
				config,
				provisioner,
			}),
		}
	}

	pub fn register(&mut self, spec: ProcessSpec) -> Result<(), SupervisorError> {
		if self.processes.iter().any(|p| p.name() == spec.name) {
			return Err(SupervisorError::DuplicateProcess(spec.name));
		}
		tracing::debug!(process = %spec.name, "registered {}", spec.command_line());
		self.processes.push(SupervisedProcess::new(spec));
		Ok(())
	}

	pub fn statuses(&self) -> Vec<ProcessStatus> {
		self.processes.iter().map(SupervisedProcess::status).collect()
	}

	/// Wipes the local index of every daemon that has a reset command. Meant
	/// for a clean start, before `run`.
	pub async fn reset_indexes(&self) {
		for process in &self.processes {
			process.reset_index().await;
		}
	}

	/// Ticks until `cancel` fires or a process exhausts its restart budget.
	/// Cancellation is only observed between ticks.
	pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), SupervisorError> {
		tracing::info!("supervising {} processes", self.processes.len());
		let interval = self.policy.config.tick_interval();

		loop {
			if cancel.is_cancelled() {
				break;
			}
			self.tick().await?;

			tokio::select! {
				_ = cancel.cancelled() => break,
				_ = tokio::time::sleep(interval) => {}
			}
		}

		tracing::info!("supervisor cancelled");
		Ok(())
	}

	/// Stops every process concurrently and waits for all of them.
	pub async fn stop(&mut self) {
		let mut workers = JoinSet::new();
		for (index, mut process) in std::mem::take(&mut self.processes).into_iter().enumerate() {
			workers.spawn(async move {
				process.stop().await;
				(index, process)
			});
		}

		let mut slots = empty_slots(workers.len());
		while let Some(joined) = workers.join_next().await {
			match joined {
				Ok((index, process)) => slots[index] = Some(process),
				Err(e) => tracing::error!("failed to stop process: {}", e),
			}
		}
		self.processes = slots.into_iter().flatten().collect();
		tracing::info!("all processes stopped");
	}

	async fn tick(&mut self) -> Result<(), SupervisorError> {
		let mut workers = JoinSet::new();
		let mut names = HashMap::new();
		for (index, mut process) in std::mem::take(&mut self.processes).into_iter().enumerate() {
			let policy = Arc::clone(&self.policy);
			let name = process.name().to_string();
			let handle = workers.spawn(async move {
				let result = policy.check(&mut process).await;
				(index, process, result)
			});
			names.insert(handle.id(), name);
		}

		let mut slots = empty_slots(workers.len());
		let mut first_error = None;
		while let Some(joined) = workers.join_next().await {
			match joined {
				Ok((index, process, result)) => {
					slots[index] = Some(process);
					if let Err(e) = result {
						first_error.get_or_insert(e);
					}
				}
				Err(e) => {
					first_error.get_or_insert(lost_worker(&names, e));
				}
			}
		}
		self.processes = slots.into_iter().flatten().collect();

		match first_error {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}
}

/// A worker that panicked took its process with it; only `kill_on_drop`
/// reaped the child.
fn lost_worker(names: &HashMap<Id, String>, err: JoinError) -> SupervisorError {
	let name = names
		.get(&err.id())
		.cloned()
		.unwrap_or_else(|| "unknown".to_string());
	tracing::error!(process = %name, "supervisor worker failed, process is no longer supervised: {}", err);
	SupervisorError::Worker {
		name,
		reason: err.to_string(),
	}
}

fn empty_slots(len: usize) -> Vec<Option<SupervisedProcess>> {
	(0..len).map(|_| None).collect()
}
