use anyhow::{Context, Result};
use glimpse_common::config::{Config, PoolSettings};
use glimpse_core::docker::DockerRuntime;
use glimpse_core::registry::probe_version;
use glimpse_core::submission::FsSubmissionStore;
use glimpse_core::{ExecutionResult, LanguageRegistry, Orchestrator, SandboxPool};
use std::path::Path;
use std::sync::Arc;

/// Run one file and print the result. Returns false if the program failed.
pub async fn run_file(
    language: &str,
    file: &Path,
    input: Option<&str>,
    input_file: Option<&Path>,
    pooled: bool,
    json: bool,
) -> Result<bool> {
    let config = Config::from_env().context("Invalid configuration")?;
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let input = match input_file {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        None => input.map(str::to_string),
    };

    let registry = LanguageRegistry::load_or_builtin(config.languages_file.as_deref())?;
    let store = Arc::new(FsSubmissionStore::new(&config.workdir));
    let orchestrator = Orchestrator::new(registry, store, config.limits.clone());

    let result = if pooled {
        eprintln!("→ Starting a one-off sandbox ({})", config.sandbox.image);
        let runtime = DockerRuntime::connect(config.sandbox.clone(), config.limits.max_output_bytes)?;
        let pool = SandboxPool::new(
            Arc::new(runtime),
            PoolSettings {
                capacity: 1,
                ..config.pool.clone()
            },
        );
        pool.warm_up();
        let result = orchestrator
            .execute(language, &code, input.as_deref(), Some(&pool))
            .await;
        pool.shutdown().await;
        result?
    } else {
        orchestrator
            .execute(language, &code, input.as_deref(), None)
            .await?
    };

    let ok = result.is_success();
    if json {
        println!("{}", serde_json::to_string_pretty(&result.into_response())?);
    } else {
        print_result(result);
    }
    Ok(ok)
}

fn print_result(result: ExecutionResult) {
    let elapsed = result.elapsed;
    let kind = result.error_kind();
    let response = result.into_response();

    print!("{}", response.output);
    if !response.output.is_empty() && !response.output.ends_with('\n') {
        println!();
    }
    println!("{}", "─".repeat(60));
    match kind {
        Some(kind) => {
            println!("✗ {} error", kind);
            eprintln!("{}", response.error.trim_end());
        }
        None => {
            println!("✓ Success");
            if !response.error.is_empty() {
                eprintln!("{}", response.error.trim_end());
            }
        }
    }
    println!(
        "  Language: {}   Info: {}   Time: {:.3}s",
        response.language,
        response.info,
        elapsed.as_secs_f64()
    );
}

/// List all configured languages, optionally probing toolchain versions
pub async fn list_languages(probe: bool) -> Result<()> {
    let config = Config::from_env().context("Invalid configuration")?;
    let registry = LanguageRegistry::load_or_builtin(config.languages_file.as_deref())?;

    println!("📋 Configured Languages:\n");
    println!("{:<6} {:<10} {:<24} {}", "Id", "Compiled", "Probe", "Version");
    println!("{}", "─".repeat(80));

    for spec in registry.specs() {
        let version = if probe {
            match probe_version(spec).await {
                Ok(line) => line,
                Err(e) => format!("unavailable ({:#})", e),
            }
        } else {
            "-".to_string()
        };
        println!(
            "{:<6} {:<10} {:<24} {}",
            spec.id.id(),
            if spec.compile_command.is_some() { "yes" } else { "no" },
            spec.version_probe,
            version
        );
    }

    println!("\n✅ Total: {} language(s)", registry.specs().count());
    Ok(())
}
