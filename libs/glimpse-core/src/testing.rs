// In-memory SandboxRuntime for pool and pooled-engine tests
use crate::runtime::{AttachedExec, ExecOutput, SandboxRuntime};
use crate::stream::DuplexStream;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

/// What a fake command "does" when run
#[derive(Debug, Clone, Default)]
pub struct ScriptedExec {
    pub exit_code: Option<i64>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub delay: Duration,
}

impl ScriptedExec {
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failed(exit_code: i64, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Handler = dyn Fn(&[String], &[u8]) -> ScriptedExec + Send + Sync;

pub struct FakeRuntime {
    next_id: AtomicUsize,
    create_attempts: AtomicUsize,
    failing_creates: AtomicUsize,
    failing_destroys: AtomicBool,
    failing_uploads: AtomicBool,
    live: Mutex<HashSet<String>>,
    destroyed: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(String, String, Vec<u8>)>>,
    commands: Mutex<Vec<(String, Vec<String>)>>,
    exit_codes: Arc<Mutex<HashMap<String, Option<i64>>>>,
    handler: Arc<Handler>,
}

impl FakeRuntime {
    /// Every command succeeds and echoes its stdin
    pub fn new() -> Self {
        Self::with_handler(|_, input| ScriptedExec::ok(input.to_vec()))
    }

    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&[String], &[u8]) -> ScriptedExec + Send + Sync + 'static,
    {
        Self {
            next_id: AtomicUsize::new(0),
            create_attempts: AtomicUsize::new(0),
            failing_creates: AtomicUsize::new(0),
            failing_destroys: AtomicBool::new(false),
            failing_uploads: AtomicBool::new(false),
            live: Mutex::new(HashSet::new()),
            destroyed: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            exit_codes: Arc::new(Mutex::new(HashMap::new())),
            handler: Arc::new(handler),
        }
    }

    pub fn fail_next_creates(&self, count: usize) {
        self.failing_creates.store(count, Ordering::SeqCst);
    }

    pub fn fail_destroys(&self, fail: bool) {
        self.failing_destroys.store(fail, Ordering::SeqCst);
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.failing_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn create_attempts(&self) -> usize {
        self.create_attempts.load(Ordering::SeqCst)
    }

    /// Successful creates
    pub fn created(&self) -> usize {
        self.next_id.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().unwrap().clone()
    }

    pub fn is_live(&self, sandbox_id: &str) -> bool {
        self.live.lock().unwrap().contains(sandbox_id)
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// (sandbox id, path, contents) of every upload, in order
    pub fn uploads(&self) -> Vec<(String, String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }

    /// argv of every exec/attach, in order
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|(_, argv)| argv.clone())
            .collect()
    }

    fn record(&self, sandbox_id: &str, argv: &[String]) -> Result<()> {
        if !self.is_live(sandbox_id) {
            bail!("No such sandbox: {}", sandbox_id);
        }
        self.commands
            .lock()
            .unwrap()
            .push((sandbox_id.to_string(), argv.to_vec()));
        Ok(())
    }
}

#[async_trait]
impl SandboxRuntime for FakeRuntime {
    async fn create(&self) -> Result<String> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(anyhow!("injected create failure"));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("fake-{}", n);
        self.live.lock().unwrap().insert(id.clone());
        Ok(id)
    }

    async fn destroy(&self, sandbox_id: &str) -> Result<()> {
        self.live.lock().unwrap().remove(sandbox_id);
        self.destroyed.lock().unwrap().push(sandbox_id.to_string());
        if self.failing_destroys.load(Ordering::SeqCst) {
            bail!("injected destroy failure");
        }
        Ok(())
    }

    async fn exec(&self, sandbox_id: &str, argv: Vec<String>, _env: Vec<String>) -> Result<ExecOutput> {
        self.record(sandbox_id, &argv)?;
        let scripted = (*self.handler)(&argv, &[]);
        tokio::time::sleep(scripted.delay).await;
        Ok(ExecOutput {
            exit_code: scripted.exit_code,
            stdout: scripted.stdout,
            stderr: scripted.stderr,
        })
    }

    async fn attach(
        &self,
        sandbox_id: &str,
        argv: Vec<String>,
        _env: Vec<String>,
    ) -> Result<AttachedExec> {
        self.record(sandbox_id, &argv)?;
        let exec_id = format!("exec-{}", uuid::Uuid::new_v4());

        // the "process": read stdin to EOF, record its exit code, emit output
        let (local, mut remote) = tokio::io::duplex(64 * 1024);
        let (tx, rx) = mpsc::channel::<io::Result<Vec<u8>>>(4);
        let handler = Arc::clone(&self.handler);
        let exit_codes = Arc::clone(&self.exit_codes);
        let task_exec_id = exec_id.clone();
        tokio::spawn(async move {
            let mut received = Vec::new();
            let _ = remote.read_to_end(&mut received).await;
            let scripted = (*handler)(&argv, &received);
            tokio::time::sleep(scripted.delay).await;
            exit_codes
                .lock()
                .unwrap()
                .insert(task_exec_id, scripted.exit_code);
            for chunk in [scripted.stdout, scripted.stderr] {
                if !chunk.is_empty() && tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
        });

        let output = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();

        Ok(AttachedExec {
            exec_id,
            stream: DuplexStream::new(Box::pin(local), output, 1024 * 1024),
        })
    }

    async fn exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        Ok(self.exit_codes.lock().unwrap().get(exec_id).copied().flatten())
    }

    async fn upload(&self, sandbox_id: &str, path: &str, contents: &[u8]) -> Result<()> {
        if !self.is_live(sandbox_id) {
            bail!("No such sandbox: {}", sandbox_id);
        }
        if self.failing_uploads.load(Ordering::SeqCst) {
            bail!("injected upload failure");
        }
        self.uploads
            .lock()
            .unwrap()
            .push((sandbox_id.to_string(), path.to_string(), contents.to_vec()));
        Ok(())
    }
}
