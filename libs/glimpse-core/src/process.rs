// Host child-process runner used by the direct execution path
use crate::registry::CommandLine;
use anyhow::{bail, Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// None when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stderr if the process wrote any, otherwise stdout
    pub fn diagnostics(&self) -> String {
        if self.stderr.is_empty() {
            String::from_utf8_lossy(&self.stdout).into_owned()
        } else {
            String::from_utf8_lossy(&self.stderr).into_owned()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Exited(ProcessOutput),
    TimedOut,
}

/// Read everything from `reader`, keeping at most `max` bytes.
///
/// Reading continues past the limit so the child never blocks on a full pipe.
async fn read_bounded<R: AsyncRead + Unpin>(mut reader: R, max: usize) -> std::io::Result<Vec<u8>> {
    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(kept);
        }
        let room = max.saturating_sub(kept.len());
        kept.extend_from_slice(&buf[..n.min(room)]);
    }
}

/// How long the output readers may take to drain once the group is dead
const DRAIN_GRACE: Duration = Duration::from_secs(1);

fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            // nothing left in the group
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => debug!(error = %e, "Failed to kill process group"),
        }
    }
}

/// Run `line` as a child process and wait for it, up to `limit`.
///
/// The child gets exactly `env` (nothing is inherited), runs in its own
/// process group, and receives `input` on stdin followed by EOF. With no
/// input, stdin is the null device. Once the child exits, or the limit
/// expires, the whole process group is killed so nothing it spawned (e.g. a
/// compiled binary run by `go run`, or a backgrounded job) outlives the run.
pub async fn run(
    line: &CommandLine,
    env: &[(String, String)],
    cwd: &Path,
    input: Option<&str>,
    limit: Duration,
    max_output: usize,
) -> Result<ProcessOutcome> {
    let mut command = Command::new(&line.program);
    command
        .args(&line.args)
        .env_clear()
        .envs(env.iter().map(|(key, value)| (key, value)))
        .current_dir(cwd)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to spawn '{}'", line.program))?;
    let pid = child.id();
    debug!(program = %line.program, pid = ?pid, "Spawned child process");

    if let (Some(data), Some(mut stdin)) = (input, child.stdin.take()) {
        let data = data.as_bytes().to_vec();
        tokio::spawn(async move {
            // the child may exit without reading; that is its business
            if let Err(e) = stdin.write_all(&data).await {
                debug!(error = %e, "Child closed stdin early");
            }
            drop(stdin);
        });
    }

    let stdout = child.stdout.take().context("Child stdout was not captured")?;
    let stderr = child.stderr.take().context("Child stderr was not captured")?;
    let mut stdout = tokio::spawn(read_bounded(stdout, max_output));
    let mut stderr = tokio::spawn(read_bounded(stderr, max_output));

    let waited = tokio::time::timeout(limit, child.wait()).await;
    kill_group(pid);

    let status = match waited {
        Ok(status) => status.context("Failed to wait for child process")?,
        Err(_) => {
            warn!(program = %line.program, pid = ?pid, limit_ms = limit.as_millis() as u64, "Child process timed out, killing");
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "Failed to kill child process");
            }
            // reap
            let _ = child.wait().await;
            stdout.abort();
            stderr.abort();
            return Ok(ProcessOutcome::TimedOut);
        }
    };

    let drained = tokio::time::timeout(DRAIN_GRACE, async {
        tokio::join!(&mut stdout, &mut stderr)
    })
    .await;
    let (stdout, stderr) = match drained {
        Ok((stdout, stderr)) => (
            stdout
                .context("Child stdout reader panicked")?
                .context("Failed to read child stdout")?,
            stderr
                .context("Child stderr reader panicked")?
                .context("Failed to read child stderr")?,
        ),
        Err(_) => {
            // a process that left the group still holds a pipe open
            stdout.abort();
            stderr.abort();
            bail!("Output of '{}' did not close after it exited", line.program);
        }
    };

    Ok(ProcessOutcome::Exited(ProcessOutput {
        exit_code: status.code(),
        stdout,
        stderr,
    }))
}
