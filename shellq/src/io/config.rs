//! Engine configuration stored as `<jobs-dir>/shellq.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::store::write_atomic;

/// Environment variable naming the jobs directory.
pub const JOBS_DIR_ENV: &str = "SHELLQ_JOBS_DIR";

/// Config file name inside the jobs directory.
pub const CONFIG_FILE_NAME: &str = "shellq.toml";

/// Engine configuration (TOML).
///
/// Every field is optional in the file; missing fields take the defaults
/// below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Interpreter each job script is passed to.
    pub shell: String,

    /// Sleep between queue scans while nothing is eligible.
    pub idle_interval_secs: u64,

    /// How often a running job checks for cancellation.
    pub output_poll_ms: u64,

    /// Wait between SIGTERM and SIGKILL when canceling a job.
    pub terminate_grace_secs: u64,

    /// Keep reading output this long after the job process exits.
    pub drain_grace_secs: u64,

    /// Address the control API listens on.
    pub bind: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            idle_interval_secs: 5,
            output_poll_ms: 100,
            terminate_grace_secs: 10,
            drain_grace_secs: 5,
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.shell.trim().is_empty() {
            return Err(anyhow!("shell must be non-empty"));
        }
        if self.idle_interval_secs == 0 {
            return Err(anyhow!("idle_interval_secs must be > 0"));
        }
        if self.output_poll_ms == 0 {
            return Err(anyhow!("output_poll_ms must be > 0"));
        }
        self.bind_addr()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .with_context(|| format!("bind `{}` is not a socket address", self.bind))
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    pub fn output_poll(&self) -> Duration {
        Duration::from_millis(self.output_poll_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// `~/.shellq/jobs`, used when neither a flag nor the environment names one.
pub fn default_jobs_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".shellq").join("jobs"))
        .ok_or_else(|| anyhow!("cannot determine home directory; pass --jobs-dir"))
}

/// Explicit location if given (flag or `SHELLQ_JOBS_DIR`), else the default.
pub fn resolve_jobs_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir),
        None => default_jobs_dir(),
    }
}

/// Config path: explicit if given, else `<jobs-dir>/shellq.toml`.
pub fn resolve_config_path(jobs_dir: &Path, explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| jobs_dir.join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        let cfg = EngineConfig {
            shell: "sh".to_string(),
            idle_interval_secs: 1,
            ..EngineConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "idle_interval_secs = 2\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.idle_interval(), Duration::from_secs(2));
        assert_eq!(cfg.shell, "bash");
    }

    #[test]
    fn rejects_zero_idle_interval_and_bad_bind() {
        let cfg = EngineConfig {
            idle_interval_secs: 0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = EngineConfig {
            bind: "localhost".to_string(),
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_path_defaults_into_jobs_dir() {
        let path = resolve_config_path(Path::new("/srv/jobs"), None);
        assert_eq!(path, PathBuf::from("/srv/jobs/shellq.toml"));
        let explicit = resolve_config_path(Path::new("/srv/jobs"), Some("/etc/q.toml".into()));
        assert_eq!(explicit, PathBuf::from("/etc/q.toml"));
    }
}
