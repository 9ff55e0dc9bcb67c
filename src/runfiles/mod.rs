//! Run files: pid, stop marker, and run metadata
//!
//! Each agent identity owns a run directory holding a pid file (its
//! existence means an agent runs for this identity), a stop marker
//! (dropped by the CLI or control plane, consumed by the loop), and a
//! JSON metadata file describing how to reach the running agent.

use crate::config::{AgentConfig, StopSignal};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// What the pid file says about this identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No pid file; nothing is running
    NotRunning,
    /// Pid file present and the process is alive
    Running(u32),
    /// Pid file present but no such process; a previous run died
    /// without cleaning up
    Stale(u32),
}

/// Contents of the metadata file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub id: String,
    pub pid: u32,
    pub api_addr: String,
    pub api_port: u16,
    pub db_path: String,
}

/// Checks the pid file and verifies liveness against the process table
pub fn check_running(config: &AgentConfig) -> Result<RunState> {
    let pid_file = config.pid_file();
    if !pid_file.exists() {
        return Ok(RunState::NotRunning);
    }

    let raw = fs::read_to_string(&pid_file)?;
    let pid: u32 = match raw.trim().parse() {
        Ok(pid) => pid,
        Err(_) => {
            tracing::warn!("unreadable pid file {}", pid_file.display());
            return Ok(RunState::Stale(0));
        }
    };

    if process_alive(pid) {
        Ok(RunState::Running(pid))
    } else {
        Ok(RunState::Stale(pid))
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    // No portable liveness check; trust the pid file
    true
}

/// Writes the pid and metadata files for this process
pub fn write_run_files(config: &AgentConfig) -> Result<()> {
    let run_dir = config.run_dir();
    create_run_dir(&run_dir)?;

    let pid = std::process::id();
    fs::write(config.pid_file(), pid.to_string())?;

    let meta = RunMeta {
        id: config.id.clone(),
        pid,
        api_addr: config.api_addr.clone(),
        api_port: config.api_port,
        db_path: config.db_path.display().to_string(),
    };
    fs::write(config.meta_file(), serde_json::to_string_pretty(&meta)?)?;
    Ok(())
}

#[cfg(unix)]
fn create_run_dir(run_dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    if run_dir.exists() {
        return Ok(());
    }
    fs::DirBuilder::new().recursive(true).mode(0o700).create(run_dir)
}

#[cfg(not(unix))]
fn create_run_dir(run_dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(run_dir)
}

/// Reads the metadata file for an identity, if present
pub fn read_meta(config: &AgentConfig) -> Result<Option<RunMeta>> {
    let meta_file = config.meta_file();
    if !meta_file.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(meta_file)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Removes the pid and metadata files; missing files are fine
pub fn remove_run_files(config: &AgentConfig) {
    for path in [config.pid_file(), config.meta_file()] {
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("could not remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Drops the stop marker for a running agent
///
/// The marker records which signal was requested so the consuming loop
/// knows whether to keep, re-enqueue, or discard the current item.
pub fn create_stop_file(config: &AgentConfig, signal: StopSignal) -> Result<()> {
    create_run_dir(&config.run_dir())?;
    let marker = match signal {
        StopSignal::Stop => "stop",
        StopSignal::HardStop => "hard_stop",
        StopSignal::Abort => "abort",
    };
    fs::write(config.stop_file(), marker)?;
    Ok(())
}

/// Consumes the stop marker if present and returns its signal
///
/// The marker is removed so one request stops the agent exactly once.
pub fn consume_stop_file(config: &AgentConfig) -> Result<Option<StopSignal>> {
    let stop_file = config.stop_file();
    if !stop_file.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&stop_file)?;
    fs::remove_file(&stop_file)?;

    let signal = match raw.trim() {
        "hard_stop" => StopSignal::HardStop,
        "abort" => StopSignal::Abort,
        // An empty or unrecognized marker is a plain stop
        _ => StopSignal::Stop,
    };
    Ok(Some(signal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> AgentConfig {
        AgentConfig {
            id: "test-agent".to_string(),
            run_dir: Some(dir.path().join("run")),
            ..Default::default()
        }
    }

    #[test]
    fn test_not_running_without_pid_file() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        assert_eq!(check_running(&config).unwrap(), RunState::NotRunning);
    }

    #[test]
    fn test_own_pid_reports_running() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        write_run_files(&config).unwrap();

        assert_eq!(
            check_running(&config).unwrap(),
            RunState::Running(std::process::id())
        );

        let meta = read_meta(&config).unwrap().unwrap();
        assert_eq!(meta.id, "test-agent");
        assert_eq!(meta.pid, std::process::id());
    }

    #[test]
    fn test_dead_pid_reports_stale() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        fs::create_dir_all(config.run_dir()).unwrap();
        // Pid values max out well below this on any running system
        fs::write(config.pid_file(), "4194305").unwrap();

        assert_eq!(check_running(&config).unwrap(), RunState::Stale(4194305));
    }

    #[test]
    fn test_remove_run_files_is_forgiving() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        write_run_files(&config).unwrap();

        remove_run_files(&config);
        assert!(!config.pid_file().exists());
        assert!(!config.meta_file().exists());

        // Second removal is a no-op
        remove_run_files(&config);
    }

    #[test]
    fn test_stop_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);

        assert_eq!(consume_stop_file(&config).unwrap(), None);

        create_stop_file(&config, StopSignal::HardStop).unwrap();
        assert_eq!(
            consume_stop_file(&config).unwrap(),
            Some(StopSignal::HardStop)
        );
        // Consumed once
        assert_eq!(consume_stop_file(&config).unwrap(), None);
    }

    #[test]
    fn test_unrecognized_marker_is_a_plain_stop() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        fs::create_dir_all(config.run_dir()).unwrap();
        fs::write(config.stop_file(), "").unwrap();

        assert_eq!(consume_stop_file(&config).unwrap(), Some(StopSignal::Stop));
    }
}
