use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber. `RUST_LOG` wins over `level` when set.
pub fn init(level: &str) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.init();
}

/// Level for the `--verbose` flag, falling back to the configured one.
pub fn level_for(verbose: bool, configured: &str) -> String {
	if verbose {
		"debug".to_string()
	} else {
		configured.to_string()
	}
}
