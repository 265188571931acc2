//! External command execution with live log streaming.
//!
//! Every external collaborator (git, gpg, reprepro, debmirror, rsync, ssh)
//! is driven through [`run`]. Output is streamed line-by-line into a
//! [`LogSink`] as it arrives, not only at process exit, so build logs can be
//! tailed while a build is running. A non-zero exit becomes
//! [`ProcessError::CommandFailed`] carrying the argv, exit code, and the
//! captured output.
//!
//! Commands run with a clean environment where it matters (callers pass
//! explicit env overrides); timeouts are the caller's responsibility, with
//! [`retry_until`] provided for poll-until-ready waits on remote nodes.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

/// Errors from external command execution.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The command ran and exited non-zero.
    #[error("command failed ({argv}): exit code {code:?}\n{output}")]
    CommandFailed {
        /// The full command line, space-joined for display.
        argv: String,
        /// Exit code, `None` if killed by a signal.
        code: Option<i32>,
        /// Captured combined output.
        output: String,
    },

    /// The command could not be spawned or its pipes failed.
    #[error("IO error running {argv}: {source}")]
    Io {
        argv: String,
        #[source]
        source: std::io::Error,
    },

    /// [`retry_until`] exhausted its timeout.
    #[error("timed out after {timeout:?}: {what}")]
    Timeout { what: String, timeout: Duration },
}

/// Result type for process operations.
pub type Result<T> = std::result::Result<T, ProcessError>;

/// Receiver for streamed command output.
///
/// Implementations must be cheap per line; the stdout and stderr readers both
/// feed the same sink, so the sink is shared behind a mutex.
pub trait LogSink: Send {
    /// Called once per output line, without the trailing newline.
    fn line(&mut self, line: &str);
}

/// A sink shared between the stdout and stderr reader threads.
pub type SharedLog = Arc<Mutex<dyn LogSink>>;

/// Discards all output.
pub struct NullLog;

impl LogSink for NullLog {
    fn line(&mut self, _line: &str) {}
}

/// Forwards output to `tracing` at debug level, prefixed with a label.
pub struct TracingLog {
    pub label: String,
}

impl TracingLog {
    pub fn new(label: impl Into<String>) -> Self {
        TracingLog { label: label.into() }
    }
}

impl LogSink for TracingLog {
    fn line(&mut self, line: &str) {
        debug!(target: "aptforge::process", "[{}] {}", self.label, line);
    }
}

/// Wraps a [`LogSink`] for sharing.
pub fn shared_log(sink: impl LogSink + 'static) -> SharedLog {
    Arc::new(Mutex::new(sink))
}

/// A request to run an external command.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Program and arguments. Must be non-empty.
    pub argv: Vec<String>,

    /// Bytes written to the child's stdin, then closed.
    pub stdin: Option<Vec<u8>>,

    /// Working directory.
    pub cwd: Option<PathBuf>,

    /// Environment overrides, applied on top of the inherited environment.
    pub env: Vec<(String, String)>,

    /// Drop stderr instead of interleaving it into the captured output.
    pub discard_stderr: bool,
}

impl RunRequest {
    /// Builds a request from string-ish arguments.
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RunRequest {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn discard_stderr(mut self) -> Self {
        self.discard_stderr = true;
        self
    }

    /// Space-joined command line for error messages and logs.
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Runs a command to completion, streaming output to `log`.
///
/// Returns the captured output bytes (stdout, with stderr interleaved at
/// line granularity unless discarded). Fails with
/// [`ProcessError::CommandFailed`] on non-zero exit, with the captured output
/// attached so callers can surface it as failure text.
pub fn run(req: &RunRequest, log: &SharedLog) -> Result<Vec<u8>> {
    let argv_display = req.display();
    let io_err = |source| ProcessError::Io {
        argv: argv_display.clone(),
        source,
    };

    debug!(target: "aptforge::process", argv = %argv_display, "spawning");

    let mut cmd = Command::new(&req.argv[0]);
    cmd.args(&req.argv[1..]);
    if let Some(dir) = &req.cwd {
        cmd.current_dir(dir);
    }
    for (k, v) in &req.env {
        cmd.env(k, v);
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(if req.discard_stderr {
        Stdio::null()
    } else {
        Stdio::piped()
    });
    cmd.stdin(if req.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    let mut child = cmd.spawn().map_err(io_err)?;

    // stdin is written from its own thread: a child that fills its stdout
    // pipe while stdin is still streaming would otherwise deadlock both
    // ends. The handle is dropped after the write so the child sees EOF; a
    // write error means the child stopped reading, which the exit status
    // reports better than the broken pipe would.
    let stdin_writer = match (&req.stdin, child.stdin.take()) {
        (Some(bytes), Some(mut stdin)) => {
            let bytes = bytes.clone();
            Some(std::thread::spawn(move || {
                let _ = stdin.write_all(&bytes);
            }))
        }
        (Some(_), None) => {
            return Err(io_err(std::io::Error::other("child stdin unavailable")));
        }
        _ => None,
    };

    let captured: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

    // stderr is drained on a separate thread so neither pipe can fill up and
    // deadlock the child.
    let stderr_reader = child.stderr.take().map(|stderr| {
        let captured = Arc::clone(&captured);
        let log = Arc::clone(log);
        std::thread::spawn(move || {
            stream_lines(BufReader::new(stderr), &captured, &log);
        })
    });

    if let Some(stdout) = child.stdout.take() {
        stream_lines(BufReader::new(stdout), &captured, log);
    }

    if let Some(handle) = stderr_reader {
        let _ = handle.join();
    }
    if let Some(handle) = stdin_writer {
        let _ = handle.join();
    }

    let status = child.wait().map_err(io_err)?;

    let output = Arc::try_unwrap(captured)
        .map(|m| m.into_inner().unwrap_or_default())
        .unwrap_or_default();

    if status.success() {
        Ok(output)
    } else {
        Err(ProcessError::CommandFailed {
            argv: argv_display,
            code: status.code(),
            output: String::from_utf8_lossy(&output).into_owned(),
        })
    }
}

/// Runs a command and returns its output as trimmed UTF-8.
pub fn run_stdout(req: &RunRequest, log: &SharedLog) -> Result<String> {
    let out = run(req, log)?;
    Ok(String::from_utf8_lossy(&out).trim().to_string())
}

fn stream_lines<R: BufRead>(reader: R, captured: &Mutex<Vec<u8>>, log: &SharedLog) {
    for line in reader.lines() {
        let Ok(line) = line else { break };
        if let Ok(mut sink) = log.lock() {
            sink.line(&line);
        }
        if let Ok(mut buf) = captured.lock() {
            buf.extend_from_slice(line.as_bytes());
            buf.push(b'\n');
        }
    }
}

/// Polls `f` at `interval` until it succeeds or `timeout` elapses.
///
/// Used for waiting on remote build nodes to become reachable. The last
/// error is discarded; the timeout error names the operation instead.
pub fn retry_until<T, E, F>(
    what: &str,
    interval: Duration,
    timeout: Duration,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> std::result::Result<T, E>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(value) = f() {
            return Ok(value);
        }
        if Instant::now() >= deadline {
            return Err(ProcessError::Timeout {
                what: what.to_string(),
                timeout,
            });
        }
        std::thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collects lines for assertions.
    pub struct VecLog(pub Vec<String>);

    impl LogSink for VecLog {
        fn line(&mut self, line: &str) {
            self.0.push(line.to_string());
        }
    }

    #[test]
    fn captures_stdout_and_streams_lines() {
        let log = shared_log(VecLog(Vec::new()));
        let req = RunRequest::new(["sh", "-c", "echo one; echo two"]);
        let out = run(&req, &log).unwrap();
        assert_eq!(String::from_utf8_lossy(&out), "one\ntwo\n");
    }

    #[test]
    fn interleaves_stderr_unless_discarded() {
        let log = shared_log(NullLog);
        let req = RunRequest::new(["sh", "-c", "echo err >&2"]);
        let out = run(&req, &log).unwrap();
        assert_eq!(String::from_utf8_lossy(&out), "err\n");

        let req = RunRequest::new(["sh", "-c", "echo err >&2"]).discard_stderr();
        let out = run(&req, &log).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn nonzero_exit_is_command_failed_with_output() {
        let log = shared_log(NullLog);
        let req = RunRequest::new(["sh", "-c", "echo doomed; exit 3"]);
        let err = run(&req, &log).unwrap_err();
        match err {
            ProcessError::CommandFailed { code, output, .. } => {
                assert_eq!(code, Some(3));
                assert!(output.contains("doomed"));
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn stdin_is_delivered() {
        let log = shared_log(NullLog);
        let req = RunRequest::new(["cat"]).stdin("hello".as_bytes().to_vec());
        let out = run(&req, &log).unwrap();
        assert_eq!(String::from_utf8_lossy(&out), "hello\n");
    }

    #[test]
    fn large_stdin_against_chatty_child_does_not_deadlock() {
        // The child floods stdout past the pipe buffer before it reads any
        // stdin, while we feed it more stdin than its pipe buffer holds.
        let log = shared_log(NullLog);
        let req = RunRequest::new(["sh", "-c", "seq 1 20000; cat >/dev/null"])
            .stdin(vec![b'x'; 1 << 20]);
        let out = run(&req, &log).unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("1\n"));
        assert!(text.contains("\n20000\n"));
    }

    #[test]
    fn retry_until_times_out() {
        let err = retry_until::<(), _, _>(
            "never ready",
            Duration::from_millis(1),
            Duration::from_millis(5),
            || Err::<(), _>(()),
        )
        .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
    }

    #[test]
    fn retry_until_returns_first_success() {
        let mut calls = 0;
        let value = retry_until(
            "ready on third try",
            Duration::from_millis(1),
            Duration::from_secs(5),
            || {
                calls += 1;
                if calls >= 3 { Ok(calls) } else { Err(()) }
            },
        )
        .unwrap();
        assert_eq!(value, 3);
    }
}
