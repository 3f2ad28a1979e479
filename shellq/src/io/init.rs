//! Initialization of a jobs directory.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

use super::config::{CONFIG_FILE_NAME, EngineConfig, write_config};
use super::store::QueueStore;

/// Options for `init_jobs_dir`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config file with defaults.
    pub force: bool,
}

/// What `init_jobs_dir` created.
#[derive(Debug, Clone)]
pub struct InitReport {
    pub store: QueueStore,
    pub config_path: PathBuf,
    /// False when an existing config was left alone.
    pub config_written: bool,
}

/// Create every state root under `root` and a default `shellq.toml`.
///
/// State roots are always (re)created; existing jobs are never touched. An
/// existing config is kept unless `options.force` is set.
pub fn init_jobs_dir(root: &Path, options: &InitOptions) -> Result<InitReport> {
    if root.exists() && !root.is_dir() {
        return Err(anyhow!(
            "init: {} exists but is not a directory",
            root.display()
        ));
    }
    let store = QueueStore::new(root);
    store.init()?;

    let config_path = root.join(CONFIG_FILE_NAME);
    let config_written = !config_path.exists() || options.force;
    if config_written {
        write_config(&config_path, &EngineConfig::default())?;
    }

    Ok(InitReport {
        store,
        config_path,
        config_written,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::core::state::JobState;

    /// Verifies init creates every state root plus a default config.
    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("jobs");

        let report = init_jobs_dir(&root, &InitOptions { force: false }).expect("init");

        for state in JobState::ALL {
            assert!(report.store.state_dir(state).is_dir(), "{state} missing");
        }
        assert!(report.config_written);
        assert!(report.config_path.is_file());
    }

    /// Verifies a customized config survives re-init unless forced.
    #[test]
    fn init_keeps_existing_config_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let report = init_jobs_dir(root, &InitOptions { force: false }).expect("init");
        fs::write(&report.config_path, "shell = \"sh\"\n").expect("customize");

        let again = init_jobs_dir(root, &InitOptions { force: false }).expect("re-init");
        assert!(!again.config_written);
        assert_eq!(
            fs::read_to_string(&again.config_path).expect("read"),
            "shell = \"sh\"\n"
        );

        let forced = init_jobs_dir(root, &InitOptions { force: true }).expect("force");
        assert!(forced.config_written);
        assert!(
            fs::read_to_string(&forced.config_path)
                .expect("read")
                .contains("shell = \"bash\"")
        );
    }

    #[test]
    fn init_rejects_file_in_place_of_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("jobs");
        fs::write(&root, "").expect("write");
        let err = init_jobs_dir(&root, &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }
}
