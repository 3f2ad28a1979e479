//! Child process execution with interleaved output capture and cooperative
//! cancellation.
//!
//! Both pipes, the child's exit and a fixed polling tick are multiplexed with
//! `tokio::select!`, so a chatty stream can never starve the other one and a
//! cancellation is noticed within one tick even when the job is silent.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelSignal;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("spawn `{shell} {}`", script.display())]
    Spawn {
        shell: String,
        script: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Reading the pipes or waiting on the child failed after launch.
    #[error("collect job output")]
    Output {
        #[source]
        source: io::Error,
        lines: Vec<String>,
    },
}

impl ProcessError {
    /// Output captured before the failure.
    pub fn lines(&self) -> &[String] {
        match self {
            ProcessError::Spawn { .. } => &[],
            ProcessError::Output { lines, .. } => lines,
        }
    }
}

/// How to launch and supervise one job script.
#[derive(Debug, Clone)]
pub struct ProcessSpec<'a> {
    pub shell: &'a str,
    pub script: &'a Path,
    /// How often cancellation and deadlines are checked.
    pub poll_interval: Duration,
    /// Time between SIGTERM and SIGKILL after a cancellation.
    pub terminate_grace: Duration,
    /// How long to keep reading pipes after the child exited.
    pub drain_grace: Duration,
}

/// Everything observed while a job ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// stdout and stderr lines, interleaved in arrival order.
    pub lines: Vec<String>,
    /// `None` when the child died from a signal.
    pub exit_code: Option<i32>,
    /// A cancellation was consumed while the child was alive.
    pub canceled: bool,
    /// False if pipes were still open when the drain grace ran out.
    pub drained: bool,
}

/// Ordered line buffer that also tees every line into the job log.
struct OutputSink {
    lines: Vec<String>,
    tee: Option<BufWriter<File>>,
}

impl OutputSink {
    fn new(tee: Option<File>) -> Self {
        Self {
            lines: Vec::new(),
            tee: tee.map(BufWriter::new),
        }
    }

    fn push(&mut self, segment: &[u8]) {
        let line = String::from_utf8_lossy(segment).into_owned();
        if let Some(writer) = self.tee.as_mut() {
            let written = writer
                .write_all(line.as_bytes())
                .and_then(|()| writer.write_all(b"\n"))
                .and_then(|()| writer.flush());
            if let Err(err) = written {
                warn!(err = %err, "failed to tee job output; keeping it in memory only");
                self.tee = None;
            }
        }
        self.lines.push(line);
    }

    fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// Run `<shell> <script>` in its own process group and capture its output.
///
/// `register` is called with the child's pid right after spawn; if it returns
/// false the job has been taken over elsewhere and the child is killed at once.
/// Cancellation is polled every `poll_interval`; when consumed, the process
/// group receives SIGTERM and, after `terminate_grace`, SIGKILL.
#[instrument(skip_all, fields(script = %spec.script.display()))]
pub async fn run_streaming(
    spec: &ProcessSpec<'_>,
    tee: Option<File>,
    cancel: &CancelSignal,
    register: impl FnOnce(Option<u32>) -> bool,
) -> Result<ProcessOutput, ProcessError> {
    let mut cmd = Command::new(spec.shell);
    cmd.arg(spec.script)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    debug!(shell = spec.shell, "spawning job");
    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        shell: spec.shell.to_string(),
        script: spec.script.to_path_buf(),
        source,
    })?;
    let pid = child.id();
    if !register(pid) {
        warn!(?pid, "job taken over before it started; killing child");
        if let Some(pid) = pid
            && let Err(err) = kill_group(pid)
        {
            warn!(pid, err = %err, "failed to send SIGKILL");
        }
        if let Err(err) = child.start_kill() {
            warn!(?pid, err = %err, "failed to kill job shell");
        }
    }

    let mut sink = OutputSink::new(tee);
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(ProcessError::Output {
            source: io::Error::other("job pipes were not captured"),
            lines: sink.into_lines(),
        });
    };
    let mut stdout = BufReader::new(stdout).split(b'\n');
    let mut stderr = BufReader::new(stderr).split(b'\n');
    let mut stdout_open = true;
    let mut stderr_open = true;

    let mut tick = tokio::time::interval(spec.poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut exit_code = None;
    let mut exited = false;
    let mut canceled = false;
    let mut kill_at: Option<Instant> = None;
    let mut drain_until: Option<Instant> = None;
    let mut drained = true;

    loop {
        if exited && !stdout_open && !stderr_open {
            break;
        }
        tokio::select! {
            segment = stdout.next_segment(), if stdout_open => match segment {
                Ok(Some(bytes)) => sink.push(&bytes),
                Ok(None) => stdout_open = false,
                Err(source) => {
                    return Err(ProcessError::Output { source, lines: sink.into_lines() });
                }
            },
            segment = stderr.next_segment(), if stderr_open => match segment {
                Ok(Some(bytes)) => sink.push(&bytes),
                Ok(None) => stderr_open = false,
                Err(source) => {
                    return Err(ProcessError::Output { source, lines: sink.into_lines() });
                }
            },
            status = child.wait(), if !exited => {
                let status = match status {
                    Ok(status) => status,
                    Err(source) => {
                        return Err(ProcessError::Output { source, lines: sink.into_lines() });
                    }
                };
                exited = true;
                exit_code = status.code();
                drain_until = Some(Instant::now() + spec.drain_grace);
                debug!(?exit_code, "job process exited");
            },
            _ = tick.tick() => {
                let now = Instant::now();
                if !exited {
                    if cancel.take() && !canceled {
                        canceled = true;
                        info!(?pid, "cancellation received; terminating job");
                        if let Some(pid) = pid
                            && let Err(err) = terminate_group(pid)
                        {
                            warn!(pid, err = %err, "failed to send SIGTERM");
                        }
                        kill_at = Some(now + spec.terminate_grace);
                    }
                    if let Some(at) = kill_at
                        && now >= at
                    {
                        warn!(?pid, "job ignored SIGTERM; sending SIGKILL");
                        if let Some(pid) = pid
                            && let Err(err) = kill_group(pid)
                        {
                            warn!(pid, err = %err, "failed to send SIGKILL");
                        }
                        if let Err(err) = child.start_kill() {
                            debug!(?pid, err = %err, "job shell already gone");
                        }
                        kill_at = None;
                    }
                } else if let Some(until) = drain_until
                    && now >= until
                {
                    warn!("job output still open after exit; giving up on drain");
                    drained = false;
                    break;
                }
            },
        }
    }

    Ok(ProcessOutput {
        lines: sink.into_lines(),
        exit_code,
        canceled,
        drained,
    })
}

/// Ask a job's whole process group to stop (SIGTERM).
pub fn terminate_group(pid: u32) -> io::Result<()> {
    signal_group(pid, libc::SIGTERM)
}

/// Forcibly stop a job's whole process group (SIGKILL).
pub fn kill_group(pid: u32) -> io::Result<()> {
    signal_group(pid, libc::SIGKILL)
}

#[allow(unsafe_code)]
fn signal_group(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(pid).map_err(|_| io::Error::other("pid out of range"))?;
    // SAFETY: killpg takes plain integers and has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pgid, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Already gone.
        return Ok(());
    }
    Err(err)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn spec(script: &Path) -> ProcessSpec<'_> {
        ProcessSpec {
            shell: "bash",
            script,
            poll_interval: Duration::from_millis(20),
            terminate_grace: Duration::from_secs(2),
            drain_grace: Duration::from_millis(500),
        }
    }

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("job.sh");
        fs::write(&path, body).expect("write script");
        path
    }

    #[tokio::test]
    async fn captures_both_streams_and_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = script(temp.path(), "echo out\necho err >&2\nexit 3\n");

        let output = run_streaming(&spec(&path), None, &CancelSignal::new(), |_| true)
            .await
            .expect("run");

        assert_eq!(output.exit_code, Some(3));
        assert!(!output.canceled);
        assert!(output.drained);
        let mut lines = output.lines.clone();
        lines.sort();
        assert_eq!(lines, vec!["err".to_string(), "out".to_string()]);
    }

    #[tokio::test]
    async fn keeps_order_within_a_stream_and_tees_to_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = script(temp.path(), "for i in 1 2 3; do echo line$i; done\nprintf tail");
        let log_path = temp.path().join("job.log");
        let log = File::create(&log_path).expect("log");

        let output = run_streaming(&spec(&path), Some(log), &CancelSignal::new(), |_| true)
            .await
            .expect("run");

        assert_eq!(output.lines, vec!["line1", "line2", "line3", "tail"]);
        assert_eq!(
            fs::read_to_string(&log_path).expect("read log"),
            "line1\nline2\nline3\ntail\n"
        );
    }

    #[tokio::test]
    async fn cancellation_terminates_and_keeps_prior_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = script(temp.path(), "echo started\nsleep 30\necho never\n");
        let cancel = CancelSignal::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.signal();
        });

        let output = run_streaming(&spec(&path), None, &cancel, |_| true)
            .await
            .expect("run");

        assert!(output.canceled);
        assert_eq!(output.lines, vec!["started"]);
        assert!(!cancel.is_set(), "consumed signal must be cleared");
    }

    #[tokio::test]
    async fn sigterm_is_escalated_to_sigkill() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = script(
            temp.path(),
            "trap '' TERM\necho stubborn\nwhile true; do sleep 0.1; done\n",
        );
        let cancel = CancelSignal::new();
        let mut spec = spec(&path);
        spec.terminate_grace = Duration::from_millis(200);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.signal();
        });

        let output = run_streaming(&spec, None, &cancel, |_| true)
            .await
            .expect("run");
        assert!(output.canceled);
        assert_eq!(output.exit_code, None);
    }

    #[tokio::test]
    async fn rejected_registration_kills_child() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = script(temp.path(), "sleep 30\n");

        let output = run_streaming(&spec(&path), None, &CancelSignal::new(), |_| false)
            .await
            .expect("run");
        assert_eq!(output.exit_code, None);
        assert!(!output.canceled);
    }

    #[tokio::test]
    async fn missing_shell_is_a_spawn_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = script(temp.path(), "true\n");
        let mut spec = spec(&path);
        spec.shell = "/nonexistent/shell";

        let err = run_streaming(&spec, None, &CancelSignal::new(), |_| true)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert!(err.lines().is_empty());
    }

    #[tokio::test]
    async fn background_grandchild_does_not_hang_drain() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = script(temp.path(), "echo parent\nsleep 30 &\nexit 0\n");
        let mut spec = spec(&path);
        spec.drain_grace = Duration::from_millis(200);

        let output = run_streaming(&spec, None, &CancelSignal::new(), |_| true)
            .await
            .expect("run");
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.lines, vec!["parent"]);
        assert!(!output.drained);
    }
}
