use std::path::PathBuf;

use berth_core::config::DEFAULT_CONFIG_PATH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	/// Keep the in-container daemons alive.
	Supervise,
	/// Ping the sync daemon until it stops answering.
	Watch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
	pub mode: Mode,
	pub remote: bool,
	pub reset: bool,
	pub verbose: bool,
	pub config: PathBuf,
}

impl Default for Options {
	fn default() -> Self {
		Self {
			mode: Mode::Supervise,
			remote: false,
			reset: false,
			verbose: false,
			config: PathBuf::from(DEFAULT_CONFIG_PATH),
		}
	}
}

pub const USAGE: &str = "usage: berth-daemon [supervise|watch] [--remote] [--reset] [--verbose] [--config <path>]";

impl Options {
	pub fn parse<I>(args: I) -> Result<Self, String>
	where
		I: IntoIterator<Item = String>,
	{
		let mut opts = Options::default();
		let mut args = args.into_iter();
		while let Some(arg) = args.next() {
			match arg.as_str() {
				"supervise" => opts.mode = Mode::Supervise,
				"watch" => opts.mode = Mode::Watch,
				"--remote" => opts.remote = true,
				"--reset" => opts.reset = true,
				"--verbose" | "-v" => opts.verbose = true,
				"--config" | "-c" => {
					let path = args.next().ok_or("--config needs a path")?;
					opts.config = PathBuf::from(path);
				}
				other => {
					if let Some(path) = other.strip_prefix("--config=") {
						opts.config = PathBuf::from(path);
					} else {
						return Err(format!("unknown argument '{}'", other));
					}
				}
			}
		}
		Ok(opts)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(args: &[&str]) -> Result<Options, String> {
		Options::parse(args.iter().map(|s| s.to_string()))
	}

	#[test]
	fn no_arguments_supervise_the_sync_daemon() {
		let opts = parse(&[]).unwrap();
		assert_eq!(opts, Options::default());
		assert_eq!(opts.config, PathBuf::from(DEFAULT_CONFIG_PATH));
	}

	#[test]
	fn flags_are_recognised() {
		let opts = parse(&["--remote", "--reset", "-v", "--config", "/tmp/berth.toml"]).unwrap();
		assert!(opts.remote);
		assert!(opts.reset);
		assert!(opts.verbose);
		assert_eq!(opts.config, PathBuf::from("/tmp/berth.toml"));
	}

	#[test]
	fn watch_mode() {
		let opts = parse(&["watch", "--config=/etc/berth.toml"]).unwrap();
		assert_eq!(opts.mode, Mode::Watch);
		assert_eq!(opts.config, PathBuf::from("/etc/berth.toml"));
	}

	#[test]
	fn bad_arguments_are_rejected() {
		assert!(parse(&["--config"]).is_err());
		assert!(parse(&["--bogus"]).unwrap_err().contains("--bogus"));
	}
}
