use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use berth_core::config::ProvisionConfig;

use crate::error::ProvisionError;

pub const CERT_FILE: &str = "cert.pem";
pub const KEY_FILE: &str = "key.pem";
pub const CONFIG_FILE: &str = "config.xml";
pub const REQUIRED_FILES: [&str; 3] = [CERT_FILE, KEY_FILE, CONFIG_FILE];

/// Mode applied to every provisioned file, copied or not.
pub const FILE_MODE: u32 = 0o644;

/// Copies the sync daemon's TLS material and config out of the mounted secret
/// into its runtime home. Files already present at the destination are left
/// untouched.
#[derive(Debug, Clone)]
pub struct Provisioner {
	source_dir: PathBuf,
	dest_dir: PathBuf,
}

impl Provisioner {
	pub fn new(source_dir: impl Into<PathBuf>, dest_dir: impl Into<PathBuf>) -> Self {
		Self {
			source_dir: source_dir.into(),
			dest_dir: dest_dir.into(),
		}
	}

	pub fn from_config(config: &ProvisionConfig) -> Self {
		Self::new(&config.source_dir, &config.dest_dir)
	}

	pub fn dest_dir(&self) -> &Path {
		&self.dest_dir
	}

	pub fn provision(&self) -> Result<(), ProvisionError> {
		if !self.source_dir.is_dir() {
			return Err(ProvisionError::Setup {
				path: self.source_dir.clone(),
				reason: "secret directory is missing".into(),
			});
		}

		fs::create_dir_all(&self.dest_dir).map_err(|source| ProvisionError::Permission {
			path: self.dest_dir.clone(),
			action: "create",
			source,
		})?;

		for file in REQUIRED_FILES {
			let to = self.dest_dir.join(file);
			if to.exists() {
				tracing::debug!("{} already provisioned", to.display());
				continue;
			}

			let from = self.source_dir.join(file);
			if !from.is_file() {
				return Err(ProvisionError::Setup {
					path: from,
					reason: "secret file is missing".into(),
				});
			}

			fs::copy(&from, &to).map_err(|source| ProvisionError::Permission {
				path: to.clone(),
				action: "copy",
				source,
			})?;
			tracing::info!("copied {} to {}", from.display(), to.display());
		}

		for file in REQUIRED_FILES {
			let path = self.dest_dir.join(file);
			fs::set_permissions(&path, fs::Permissions::from_mode(FILE_MODE)).map_err(|source| {
				ProvisionError::Permission {
					path: path.clone(),
					action: "chmod",
					source,
				}
			})?;
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn seeded_source(dir: &Path) -> PathBuf {
		let source = dir.join("secret");
		fs::create_dir_all(&source).unwrap();
		for file in REQUIRED_FILES {
			fs::write(source.join(file), format!("source {}", file)).unwrap();
		}
		source
	}

	fn mode(path: &Path) -> u32 {
		fs::metadata(path).unwrap().permissions().mode() & 0o777
	}

	#[test]
	fn copies_all_files_into_missing_destination() {
		let tmp = tempfile::tempdir().unwrap();
		let source = seeded_source(tmp.path());
		let dest = tmp.path().join("config");

		Provisioner::new(&source, &dest).provision().unwrap();

		for file in REQUIRED_FILES {
			let content = fs::read_to_string(dest.join(file)).unwrap();
			assert_eq!(content, format!("source {}", file));
			assert_eq!(mode(&dest.join(file)), FILE_MODE);
		}
	}

	#[test]
	fn existing_files_are_kept_and_normalized() {
		let tmp = tempfile::tempdir().unwrap();
		let source = seeded_source(tmp.path());
		let dest = tmp.path().join("config");
		fs::create_dir_all(&dest).unwrap();
		fs::write(dest.join(CONFIG_FILE), "newer config").unwrap();
		fs::set_permissions(dest.join(CONFIG_FILE), fs::Permissions::from_mode(0o600)).unwrap();

		let provisioner = Provisioner::new(&source, &dest);
		provisioner.provision().unwrap();
		provisioner.provision().unwrap();

		assert_eq!(fs::read_to_string(dest.join(CONFIG_FILE)).unwrap(), "newer config");
		assert_eq!(fs::read_to_string(dest.join(CERT_FILE)).unwrap(), "source cert.pem");
		for file in REQUIRED_FILES {
			assert_eq!(mode(&dest.join(file)), FILE_MODE);
		}
	}

	#[test]
	fn missing_source_directory_fails() {
		let tmp = tempfile::tempdir().unwrap();
		let result = Provisioner::new(tmp.path().join("nope"), tmp.path().join("config")).provision();
		assert!(matches!(result, Err(ProvisionError::Setup { .. })));
		assert!(!tmp.path().join("config").exists());
	}

	#[test]
	fn missing_source_file_fails() {
		let tmp = tempfile::tempdir().unwrap();
		let source = seeded_source(tmp.path());
		fs::remove_file(source.join(KEY_FILE)).unwrap();

		let result = Provisioner::new(&source, tmp.path().join("config")).provision();
		match result {
			Err(ProvisionError::Setup { path, .. }) => assert!(path.ends_with(KEY_FILE)),
			other => panic!("unexpected result: {:?}", other),
		}
	}
}
