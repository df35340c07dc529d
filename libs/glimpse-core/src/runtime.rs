// Sandbox runtime seam: everything the pool and pooled engine need from a container backend
use crate::stream::DuplexStream;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;

/// Captured result of a non-interactive command inside a sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: Option<i64>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stderr if the command wrote any, otherwise stdout
    pub fn diagnostics(&self) -> String {
        if self.stderr.is_empty() {
            String::from_utf8_lossy(&self.stdout).into_owned()
        } else {
            String::from_utf8_lossy(&self.stderr).into_owned()
        }
    }
}

/// A command running inside a sandbox with stdin/stdout attached
pub struct AttachedExec {
    pub exec_id: String,
    pub stream: DuplexStream,
}

/// Container backend used by [`crate::pool::SandboxPool`].
///
/// Implementations must make `create` return a started, long-running sandbox
/// and `destroy` forcibly stop and remove it.
#[async_trait]
pub trait SandboxRuntime: Send + Sync + 'static {
    /// Create and start one sandbox in detached mode, returning its runtime id
    async fn create(&self) -> Result<String>;

    async fn destroy(&self, sandbox_id: &str) -> Result<()>;

    /// Run `argv` to completion and capture its output
    async fn exec(&self, sandbox_id: &str, argv: Vec<String>, env: Vec<String>)
        -> Result<ExecOutput>;

    /// Start `argv` with stdin attached, returning the duplex stream to it
    async fn attach(
        &self,
        sandbox_id: &str,
        argv: Vec<String>,
        env: Vec<String>,
    ) -> Result<AttachedExec>;

    /// Exit code of an attached exec once its stream has closed
    async fn exit_code(&self, exec_id: &str) -> Result<Option<i64>>;

    /// Write `contents` to `path` inside the sandbox.
    ///
    /// The default pipes the bytes through `cat` over an attached stream, which
    /// needs nothing from the image beyond a POSIX shell.
    async fn upload(&self, sandbox_id: &str, path: &str, contents: &[u8]) -> Result<()> {
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            "cat > \"$1\"".to_string(),
            "sh".to_string(),
            path.to_string(),
        ];
        let mut attached = self.attach(sandbox_id, argv, Vec::new()).await?;
        attached
            .stream
            .write_input(contents)
            .await
            .context("Failed to stream file into sandbox")?;
        attached
            .stream
            .close_input()
            .await
            .context("Failed to close upload stream")?;
        attached.stream.read_to_close().await?;

        let exit_code = self.exit_code(&attached.exec_id).await?;
        if exit_code != Some(0) {
            bail!("Writing {} inside sandbox exited with {:?}", path, exit_code);
        }
        debug!(sandbox_id = sandbox_id, path = path, bytes = contents.len(), "Uploaded file to sandbox");
        Ok(())
    }
}
