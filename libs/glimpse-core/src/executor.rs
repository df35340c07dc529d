/// Execution Orchestrator - Request-level Pipeline
///
/// **Responsibility:**
/// Validate → (acquire) → materialize → compile → execute → clean up →
/// (release), timed from the very first step.
///
/// **Architecture:**
/// 1. Validation happens before any filesystem or process work
/// 2. The engine runs the compile/execute steps (engine.rs)
/// 3. Submission files are removed on every exit path (`SubmissionGuard`)
/// 4. Leased sandboxes are released on every exit path (`SandboxLease`)
///
/// This module is the glue layer; it knows nothing about how a command is
/// spawned or how a sandbox is created.
use crate::engine::{self, RunOutput};
use crate::error::{ErrorKind, ExecutionError};
use crate::pool::SandboxPool;
use crate::registry::{LanguageRegistry, LanguageSpec};
use crate::submission::{SubmissionGuard, SubmissionStore};
use glimpse_common::config::LimitSettings;
use glimpse_common::types::{Language, RunResponse};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Outcome of one run that reached the compile/execute steps
#[derive(Debug)]
pub struct ExecutionResult {
    pub language: Language,
    pub stdout: String,
    pub stderr: String,
    /// Compile / runtime / timeout failure of the submitted program
    pub error: Option<ExecutionError>,
    pub elapsed: Duration,
    /// Version-probe command of the toolchain that ran the program
    pub info: String,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(ExecutionError::kind)
    }

    pub fn into_response(self) -> RunResponse {
        let error = match &self.error {
            Some(e) => e.to_string(),
            None => self.stderr,
        };
        RunResponse {
            output: self.stdout,
            error,
            language: self.language.id().to_string(),
            info: self.info,
            execution_time: Some(self.elapsed.as_secs_f64()),
        }
    }
}

/// Runs submissions directly on the host or inside pooled sandboxes
pub struct Orchestrator {
    registry: Arc<LanguageRegistry>,
    store: Arc<dyn SubmissionStore>,
    limits: LimitSettings,
}

impl Orchestrator {
    pub fn new(
        registry: LanguageRegistry,
        store: Arc<dyn SubmissionStore>,
        limits: LimitSettings,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            limits,
        }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn limits(&self) -> &LimitSettings {
        &self.limits
    }

    /// Reject a request before anything touches the disk or spawns a process
    pub fn validate(&self, language: &str, code: &str) -> Result<Language, ExecutionError> {
        if code.is_empty() {
            return Err(ExecutionError::Validation(
                "No code found to execute.".to_string(),
            ));
        }
        if code.len() > self.limits.max_source_bytes {
            return Err(ExecutionError::Validation(format!(
                "Source code exceeds maximum size of {} bytes",
                self.limits.max_source_bytes
            )));
        }
        language.parse::<Language>().map_err(ExecutionError::Validation)
    }

    /// Run `code` once.
    ///
    /// With `pool`, the run happens inside a freshly leased sandbox that is
    /// destroyed afterwards; without, it runs as host child processes.
    #[tracing::instrument(
        skip(self, code, input, pool),
        fields(language = %language, strategy = if pool.is_some() { "pooled" } else { "direct" })
    )]
    pub async fn execute(
        &self,
        language: &str,
        code: &str,
        input: Option<&str>,
        pool: Option<&SandboxPool>,
    ) -> Result<ExecutionResult, ExecutionError> {
        let start = Instant::now();
        let language = self.validate(language, code)?;
        let spec = self.registry.resolve(language);

        let output = match pool {
            Some(pool) => self.execute_pooled(pool, spec, code, input).await?,
            None => self.execute_direct(spec, code, input).await?,
        };

        let result = ExecutionResult {
            language,
            stdout: output.stdout,
            stderr: output.stderr,
            error: output.error,
            elapsed: start.elapsed(),
            info: spec.version_probe.clone(),
        };

        info!(
            language = %language,
            outcome = result.error_kind().map(|k| k.as_str()).unwrap_or("success"),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Execution finished"
        );
        Ok(result)
    }

    async fn execute_direct(
        &self,
        spec: &LanguageSpec,
        code: &str,
        input: Option<&str>,
    ) -> Result<RunOutput, ExecutionError> {
        let submission = self.store.create(spec.id, code).await?;
        let guard = SubmissionGuard::new(
            Arc::clone(&self.store),
            &submission,
            spec.output_extension.clone(),
        );

        let run = engine::run_direct(spec, &submission, self.store.as_ref(), input, &self.limits)
            .await;

        if let Err(e) = guard.remove().await {
            warn!(job_id = %submission.job_id, error = %e, "Failed to remove submission");
        }
        Ok(run?)
    }

    async fn execute_pooled(
        &self,
        pool: &SandboxPool,
        spec: &LanguageSpec,
        code: &str,
        input: Option<&str>,
    ) -> Result<RunOutput, ExecutionError> {
        let lease = pool.acquire().await?;
        let submission = self.store.create(spec.id, code).await?;
        let guard = SubmissionGuard::new(
            Arc::clone(&self.store),
            &submission,
            spec.output_extension.clone(),
        );

        let run = engine::run_pooled(
            pool.runtime().as_ref(),
            lease.id(),
            spec,
            &submission,
            input,
            &self.limits,
        )
        .await;

        if let Err(e) = guard.remove().await {
            warn!(job_id = %submission.job_id, error = %e, "Failed to remove submission");
        }
        lease.release();

        if let Err(e) = &run {
            warn!(job_id = %submission.job_id, error = %format!("{:#}", e), "Pooled execution failed");
        }
        Ok(run?)
    }
}
