/// Execution Engine - Compile then Execute, on the Host or in a Sandbox
///
/// **Core Responsibility:**
/// Run one materialized submission through its optional compile step and its
/// execute step, and classify the outcome.
///
/// **Boundary:**
/// - Engine knows HOW to run (host child process, sandbox exec / attach)
/// - Engine does NOT validate requests, manage the pool or clean up files;
///   the orchestrator owns those
/// - User-code failures (compile / runtime / timeout) come back inside
///   `RunOutput::error`; only infrastructure trouble is an `Err`
use crate::error::ExecutionError;
use crate::process::{self, ProcessOutcome};
use crate::registry::{CommandPaths, LanguageSpec};
use crate::runtime::SandboxRuntime;
use crate::sanitizer::sanitize;
use crate::submission::{Submission, SubmissionStore};
use anyhow::{Context, Result};
use glimpse_common::config::LimitSettings;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Directory inside a sandbox where submissions and artifacts are placed
pub const SANDBOX_DIR: &str = "/tmp";

/// Captured result of one compile → execute pipeline
#[derive(Debug, Default)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub error: Option<ExecutionError>,
}

impl RunOutput {
    fn failed(error: ExecutionError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }
}

fn compile_timed_out(limit: Duration) -> ExecutionError {
    ExecutionError::Compile {
        diagnostics: format!("Compilation timed out after {}ms", limit.as_millis()),
    }
}

fn runtime_error(exit_code: Option<i64>, stderr: &str) -> ExecutionError {
    let message = if stderr.is_empty() {
        match exit_code {
            Some(code) => format!("Process exited with status {}", code),
            None => "Process was terminated by a signal".to_string(),
        }
    } else {
        stderr.to_string()
    };
    ExecutionError::Runtime { exit_code, message }
}

/// Host layout: `submissions/<job>.<lang>` and `outputs/<job>.<ext>`, made
/// absolute since the child runs from the submissions directory
fn host_paths(submission: &Submission, artifact: Option<&Path>) -> Result<CommandPaths> {
    let source = std::path::absolute(&submission.source_path)
        .context("Failed to resolve submission path")?;
    let artifact = artifact
        .map(std::path::absolute)
        .transpose()
        .context("Failed to resolve artifact path")?;
    Ok(CommandPaths {
        source: source.display().to_string(),
        artifact: artifact.map(|p| p.display().to_string()),
    })
}

/// Sandbox layout: `/tmp/<job>.<lang>` and `/tmp/<job>.<ext>`
pub fn sandbox_paths(spec: &LanguageSpec, submission: &Submission) -> CommandPaths {
    CommandPaths {
        source: format!("{}/{}", SANDBOX_DIR, submission.file_name()),
        artifact: spec
            .output_extension
            .as_ref()
            .map(|ext| format!("{}/{}.{}", SANDBOX_DIR, submission.job_id, ext)),
    }
}

/// Run a submission as host child processes.
///
/// Both steps get the sanitized host environment and run from the directory
/// holding the source file. The compile step never sees `input`.
pub async fn run_direct(
    spec: &LanguageSpec,
    submission: &Submission,
    store: &dyn SubmissionStore,
    input: Option<&str>,
    limits: &LimitSettings,
) -> Result<RunOutput> {
    let artifact = spec
        .output_extension
        .as_deref()
        .map(|ext| store.artifact_path(submission.job_id, ext));
    let paths = host_paths(submission, artifact.as_deref())?;
    let env = spec.host_env();
    let cwd = submission
        .source_path
        .parent()
        .context("Submission path has no parent directory")?;

    if let Some(compile) = spec.compile_line(&paths) {
        debug!(job_id = %submission.job_id, program = %compile.program, "Compiling on host");
        match process::run(&compile, &env, cwd, None, limits.compile_timeout, limits.max_output_bytes)
            .await?
        {
            ProcessOutcome::TimedOut => {
                return Ok(RunOutput::failed(compile_timed_out(limits.compile_timeout)))
            }
            ProcessOutcome::Exited(out) if !out.success() => {
                info!(job_id = %submission.job_id, exit_code = ?out.exit_code, "Compilation failed");
                return Ok(RunOutput::failed(ExecutionError::Compile {
                    diagnostics: out.diagnostics(),
                }));
            }
            ProcessOutcome::Exited(_) => {}
        }
    }

    let execute = spec.execute_line(&paths);
    debug!(job_id = %submission.job_id, program = %execute.program, "Executing on host");
    let outcome = process::run(
        &execute,
        &env,
        cwd,
        input,
        limits.execute_timeout,
        limits.max_output_bytes,
    )
    .await?;

    Ok(match outcome {
        ProcessOutcome::TimedOut => RunOutput::failed(ExecutionError::Timeout {
            limit: limits.execute_timeout,
        }),
        ProcessOutcome::Exited(out) => {
            let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
            let error = if out.success() {
                None
            } else {
                Some(runtime_error(out.exit_code.map(i64::from), &stderr))
            };
            RunOutput {
                stdout,
                stderr,
                error,
            }
        }
    })
}

/// Run a submission inside a leased sandbox.
///
/// The source is copied to `/tmp/<job>.<lang>` and the command placeholders
/// are rendered against that layout. With `input`, the execute step is an
/// attached exec fed through a [`crate::stream::DuplexStream`] and its output
/// is sanitized; without, it is a plain exec. Both steps run under the same
/// ceilings as the host path.
pub async fn run_pooled(
    runtime: &dyn SandboxRuntime,
    sandbox_id: &str,
    spec: &LanguageSpec,
    submission: &Submission,
    input: Option<&str>,
    limits: &LimitSettings,
) -> Result<RunOutput> {
    let contents = tokio::fs::read(&submission.source_path)
        .await
        .with_context(|| format!("Failed to read {}", submission.source_path.display()))?;

    let paths = sandbox_paths(spec, submission);
    runtime
        .upload(sandbox_id, &paths.source, &contents)
        .await
        .context("Failed to transfer submission into sandbox")?;
    let env = spec.sandbox_env();

    if let Some(compile) = spec.compile_line(&paths) {
        debug!(job_id = %submission.job_id, sandbox_id = sandbox_id, "Compiling in sandbox");
        let compiled = tokio::time::timeout(
            limits.compile_timeout,
            runtime.exec(sandbox_id, compile.argv(), env.clone()),
        )
        .await;
        match compiled {
            Err(_) => return Ok(RunOutput::failed(compile_timed_out(limits.compile_timeout))),
            Ok(out) => {
                let out = out.context("Compile step failed to run")?;
                if !out.success() {
                    info!(job_id = %submission.job_id, exit_code = ?out.exit_code, "Compilation failed");
                    return Ok(RunOutput::failed(ExecutionError::Compile {
                        diagnostics: out.diagnostics(),
                    }));
                }
            }
        }
    }

    let argv = spec.execute_line(&paths).argv();
    debug!(job_id = %submission.job_id, sandbox_id = sandbox_id, interactive = input.is_some(), "Executing in sandbox");

    match input {
        Some(input) => {
            let exchange = async {
                let mut attached = runtime.attach(sandbox_id, argv, env).await?;
                let captured = attached
                    .stream
                    .exchange(input.as_bytes())
                    .await
                    .context("Failed to exchange data with sandboxed process")?;
                if captured.truncated {
                    debug!(job_id = %submission.job_id, "Sandbox output truncated");
                }
                let exit_code = runtime.exit_code(&attached.exec_id).await?;
                Ok::<_, anyhow::Error>((captured.bytes, exit_code))
            };

            match tokio::time::timeout(limits.execute_timeout, exchange).await {
                Err(_) => Ok(RunOutput::failed(ExecutionError::Timeout {
                    limit: limits.execute_timeout,
                })),
                Ok(result) => {
                    let (bytes, exit_code) = result?;
                    let text = sanitize(&bytes);
                    // stdout and stderr share one stream here; an unknown
                    // status counts as success
                    match exit_code {
                        Some(code) if code != 0 => Ok(RunOutput {
                            stdout: String::new(),
                            stderr: text.clone(),
                            error: Some(runtime_error(exit_code, &text)),
                        }),
                        _ => Ok(RunOutput {
                            stdout: text,
                            ..Default::default()
                        }),
                    }
                }
            }
        }
        None => {
            match tokio::time::timeout(limits.execute_timeout, runtime.exec(sandbox_id, argv, env))
                .await
            {
                Err(_) => Ok(RunOutput::failed(ExecutionError::Timeout {
                    limit: limits.execute_timeout,
                })),
                Ok(out) => {
                    let out = out.context("Execute step failed to run")?;
                    let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
                    let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
                    let error = if out.success() {
                        None
                    } else {
                        Some(runtime_error(out.exit_code, &stderr))
                    };
                    Ok(RunOutput {
                        stdout,
                        stderr,
                        error,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LanguageRegistry;
    use glimpse_common::types::Language;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn submission(language: Language) -> Submission {
        let job_id = Uuid::new_v4();
        Submission {
            job_id,
            language,
            source_path: PathBuf::from(format!("submissions/{}.{}", job_id, language.id())),
            artifact_path: None,
        }
    }

    #[test]
    fn test_sandbox_paths_for_compiled_language() {
        let registry = LanguageRegistry::builtin();
        let spec = registry.resolve(Language::Cpp);
        let submission = submission(Language::Cpp);

        let paths = sandbox_paths(spec, &submission);
        assert_eq!(paths.source, format!("/tmp/{}.cpp", submission.job_id));
        assert_eq!(
            paths.artifact,
            Some(format!("/tmp/{}.out", submission.job_id))
        );
        assert_eq!(
            spec.execute_line(&paths).argv(),
            vec![format!("/tmp/{}.out", submission.job_id)]
        );
    }

    #[test]
    fn test_host_paths_are_absolute() {
        let submission = submission(Language::Python);
        let paths = host_paths(&submission, None).unwrap();
        assert!(Path::new(&paths.source).is_absolute());
        assert!(paths.source.ends_with(&format!("{}.py", submission.job_id)));
        assert_eq!(paths.artifact, None);
    }

    #[test]
    fn test_runtime_error_message_falls_back_to_status() {
        match runtime_error(Some(3), "") {
            ExecutionError::Runtime { message, .. } => {
                assert_eq!(message, "Process exited with status 3")
            }
            other => panic!("unexpected {:?}", other),
        }
        match runtime_error(Some(1), "Traceback\n") {
            ExecutionError::Runtime { message, .. } => assert_eq!(message, "Traceback\n"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
