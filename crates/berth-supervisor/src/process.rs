use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use berth_core::config::SupervisorConfig;
use berth_core::types::{ProcessSpec, ProcessState, ProcessStatus};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::ProcessError;
use crate::output::OutputCapture;

const RESET_TIMEOUT: Duration = Duration::from_secs(60);

/// How a started process came to an end, as seen by its exit watcher.
#[derive(Debug)]
enum ExitOutcome {
	Clean,
	Failed(String),
	Stopped,
}

struct Running {
	stop: watch::Sender<bool>,
	watcher: JoinHandle<ExitOutcome>,
}

/// One daemon under supervision. Only the supervisor's control loop mutates
/// it, one worker at a time.
pub struct SupervisedProcess {
	spec: ProcessSpec,
	state: ProcessState,
	starts: u32,
	started_at: Option<Instant>,
	pid: Option<u32>,
	last_pid: Option<u32>,
	exhausted: bool,
	output: OutputCapture,
	running: Option<Running>,
}

impl SupervisedProcess {
	pub fn new(spec: ProcessSpec) -> Self {
		let output = OutputCapture::new(&spec.name);
		Self {
			spec,
			state: ProcessState::NeverStarted,
			starts: 0,
			started_at: None,
			pid: None,
			last_pid: None,
			exhausted: false,
			output,
			running: None,
		}
	}

	pub fn name(&self) -> &str {
		&self.spec.name
	}

	pub fn spec(&self) -> &ProcessSpec {
		&self.spec
	}

	pub fn state(&self) -> ProcessState {
		self.state
	}

	pub fn starts(&self) -> u32 {
		self.starts
	}

	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	/// Pid of the most recent launch, kept after the process is gone.
	pub fn last_pid(&self) -> Option<u32> {
		self.last_pid
	}

	pub fn uptime(&self) -> Option<Duration> {
		if !self.state.is_running() {
			return None;
		}
		self.started_at.map(|t| t.elapsed())
	}

	pub fn is_exhausted(&self) -> bool {
		self.exhausted
	}

	pub(crate) fn mark_exhausted(&mut self) {
		self.exhausted = true;
	}

	pub fn status(&self) -> ProcessStatus {
		ProcessStatus {
			name: self.spec.name.clone(),
			state: self.state,
			pid: self.pid,
			starts: self.starts,
			exhausted: self.exhausted,
		}
	}

	/// Launches the process and waits out the grace window. Surviving the
	/// window means the process is running, not that it is ready to serve.
	pub async fn start(&mut self, config: &SupervisorConfig) -> Result<(), ProcessError> {
		self.starts += 1;
		let name = self.spec.name.clone();
		tracing::info!(process = %name, starts = self.starts, "starting {}", self.spec.command_line());

		let mut child = match self.spawn() {
			Ok(child) => child,
			Err(e) => {
				tracing::error!(process = %name, "process didn't start: {}", e);
				self.state = ProcessState::Fatal;
				return Err(ProcessError::Start {
					name,
					reason: e.to_string(),
				});
			}
		};

		self.pid = child.id();
		self.last_pid = self.pid;
		self.started_at = Some(Instant::now());

		if let Some(stdout) = child.stdout.take() {
			self.output.forward(stdout, "stdout");
		}
		if let Some(stderr) = child.stderr.take() {
			self.output.forward(stderr, "stderr");
		}

		let grace = config.grace_period();
		tokio::time::sleep(grace).await;

		let reason = match child.try_wait() {
			Ok(None) => {
				let (stop_tx, stop_rx) = watch::channel(false);
				let watcher = tokio::spawn(watch_exit(
					name.clone(),
					child,
					stop_rx,
					config.stop_timeout(),
				));
				self.running = Some(Running {
					stop: stop_tx,
					watcher,
				});
				self.state = ProcessState::Started;
				tracing::info!(process = %name, pid = ?self.pid, "process started");
				return Ok(());
			}
			Ok(Some(status)) => format!("process wasn't running after {:?} ({})", grace, status),
			Err(e) => format!("failed to probe process: {}", e),
		};

		tracing::error!(process = %name, pid = ?self.pid, "{}", reason);
		self.log_tail().await;
		self.state = ProcessState::Fatal;
		self.pid = None;
		Err(ProcessError::Start { name, reason })
	}

	/// Folds an exit observed by the watcher into the state. A no-op unless
	/// the process is started and its watcher has finished.
	pub async fn poll_exit(&mut self) {
		let finished = matches!(&self.running, Some(running) if running.watcher.is_finished());
		if !finished {
			return;
		}
		let Some(running) = self.running.take() else {
			return;
		};

		let name = self.spec.name.clone();
		self.pid = None;
		match running.watcher.await {
			Ok(ExitOutcome::Clean) => {
				tracing::info!(process = %name, "process exited with status 0");
				self.state = ProcessState::Stopped;
			}
			Ok(ExitOutcome::Stopped) => {
				self.state = ProcessState::Stopped;
			}
			Ok(ExitOutcome::Failed(reason)) => {
				let err = ProcessError::Runtime { name, reason };
				tracing::error!(process = %self.spec.name, "{}", err);
				self.log_tail().await;
				self.state = ProcessState::Fatal;
			}
			Err(e) => {
				tracing::error!(process = %name, "exit watcher failed: {}", e);
				self.state = ProcessState::Fatal;
			}
		}
	}

	/// Stops the process and waits for the exit to be acknowledged, killing it
	/// if it ignores SIGTERM for longer than the stop timeout.
	pub async fn stop(&mut self) {
		let Some(running) = self.running.take() else {
			tracing::info!(process = %self.spec.name, "process hasn't started");
			return;
		};

		self.state = ProcessState::Stopping;
		tracing::info!(process = %self.spec.name, pid = ?self.pid, "stopping process");
		let _ = running.stop.send(true);

		match running.watcher.await {
			Ok(_) => tracing::info!(process = %self.spec.name, "process stopped"),
			Err(e) => tracing::error!(process = %self.spec.name, "failed to stop process: {}", e),
		}
		self.state = ProcessState::Stopped;
		self.pid = None;
	}

	/// Runs the daemon's index reset, if it has one. Failures are only logged.
	pub async fn reset_index(&self) {
		let Some(args) = &self.spec.reset_args else {
			return;
		};
		let name = &self.spec.name;
		tracing::info!(process = %name, "resetting local index");

		let mut cmd = Command::new(&self.spec.path);
		cmd.args(args)
			.envs(&self.spec.env)
			.stdin(Stdio::null())
			.kill_on_drop(true);

		match tokio::time::timeout(RESET_TIMEOUT, cmd.output()).await {
			Ok(Ok(out)) if out.status.success() => {
				tracing::info!(process = %name, "local index reset")
			}
			Ok(Ok(out)) => tracing::warn!(
				process = %name,
				"index reset exited with {}: {}",
				out.status,
				String::from_utf8_lossy(&out.stderr).trim()
			),
			Ok(Err(e)) => tracing::warn!(process = %name, "failed to run index reset: {}", e),
			Err(_) => tracing::warn!(process = %name, "index reset timed out after {:?}", RESET_TIMEOUT),
		}
	}

	fn spawn(&self) -> std::io::Result<Child> {
		let mut cmd = Command::new(&self.spec.path);
		cmd.args(&self.spec.args)
			.envs(&self.spec.env)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			// own group so leftovers can be terminated together
			.process_group(0)
			.kill_on_drop(true);
		cmd.spawn()
	}

	async fn log_tail(&self) {
		let tail = self.output.snapshot().await;
		if tail.is_empty() {
			return;
		}
		tracing::error!(process = %self.spec.name, "last output:\n{}", tail.join("\n"));
	}
}

async fn watch_exit(
	name: String,
	mut child: Child,
	mut stop: watch::Receiver<bool>,
	stop_timeout: Duration,
) -> ExitOutcome {
	tracing::debug!(process = %name, "monitoring process");
	let status = tokio::select! {
		status = child.wait() => status,
		_ = stop.changed() => {
			terminate(&name, &mut child, stop_timeout).await;
			return ExitOutcome::Stopped;
		}
	};

	tracing::info!(process = %name, "process done");
	match status {
		Ok(status) if status.success() => ExitOutcome::Clean,
		Ok(status) => ExitOutcome::Failed(describe(status)),
		Err(e) => ExitOutcome::Failed(e.to_string()),
	}
}

async fn terminate(name: &str, child: &mut Child, stop_timeout: Duration) {
	if let Some(pid) = child.id() {
		let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM);
	}
	if tokio::time::timeout(stop_timeout, child.wait()).await.is_ok() {
		return;
	}

	tracing::warn!(process = name, "process ignored SIGTERM for {:?}, killing", stop_timeout);
	if let Some(pid) = child.id() {
		let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
	}
	if let Err(e) = child.kill().await {
		tracing::error!(process = name, "failed to kill process: {}", e);
	}
}

fn describe(status: ExitStatus) -> String {
	use std::os::unix::process::ExitStatusExt;
	match (status.code(), status.signal()) {
		(Some(code), _) => format!("exit status {}", code),
		(None, Some(signal)) => format!("killed by signal {}", signal),
		_ => status.to_string(),
	}
}
