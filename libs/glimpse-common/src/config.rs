// Service configuration, read once at startup from the environment
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Sandbox pool sizing and timing
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub capacity: usize,
    pub acquire_timeout: Duration,
    pub provision_backoff: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            capacity: 2,
            acquire_timeout: Duration::from_secs(5),
            provision_backoff: Duration::from_secs(1),
        }
    }
}

/// Ceilings applied to every run, whichever strategy executes it
#[derive(Debug, Clone)]
pub struct LimitSettings {
    pub compile_timeout: Duration,
    pub execute_timeout: Duration,
    pub max_output_bytes: usize,
    pub max_source_bytes: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            compile_timeout: Duration::from_secs(20),
            execute_timeout: Duration::from_secs(30),
            max_output_bytes: 1024 * 1024,
            max_source_bytes: 1024 * 1024,
        }
    }
}

/// Container settings for pooled sandboxes
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub image: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    pub network_disabled: bool,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            image: "glimpse".to_string(),
            memory_limit_mb: 256,
            cpu_limit: 0.5,
            network_disabled: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub pool: PoolSettings,
    pub limits: LimitSettings,
    pub sandbox: SandboxSettings,
    /// Root for the `submissions/` and `outputs/` directories
    pub workdir: PathBuf,
    /// Optional JSON file replacing the built-in language table
    pub languages_file: Option<PathBuf>,
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool: PoolSettings::default(),
            limits: LimitSettings::default(),
            sandbox: SandboxSettings::default(),
            workdir: PathBuf::from("."),
            languages_file: None,
            bind_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Unset keys fall back to defaults; set but malformed values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let pool = PoolSettings {
            capacity: parse_or(&lookup, "GLIMPSE_POOL_SIZE", defaults.pool.capacity)?,
            acquire_timeout: millis_or(
                &lookup,
                "GLIMPSE_ACQUIRE_TIMEOUT_MS",
                defaults.pool.acquire_timeout,
            )?,
            provision_backoff: millis_or(
                &lookup,
                "GLIMPSE_PROVISION_BACKOFF_MS",
                defaults.pool.provision_backoff,
            )?,
        };
        if pool.capacity == 0 {
            anyhow::bail!("GLIMPSE_POOL_SIZE must be at least 1");
        }

        let limits = LimitSettings {
            compile_timeout: millis_or(
                &lookup,
                "GLIMPSE_COMPILE_TIMEOUT_MS",
                defaults.limits.compile_timeout,
            )?,
            execute_timeout: millis_or(
                &lookup,
                "GLIMPSE_EXECUTE_TIMEOUT_MS",
                defaults.limits.execute_timeout,
            )?,
            max_output_bytes: parse_or(
                &lookup,
                "GLIMPSE_MAX_OUTPUT_BYTES",
                defaults.limits.max_output_bytes,
            )?,
            max_source_bytes: parse_or(
                &lookup,
                "GLIMPSE_MAX_SOURCE_BYTES",
                defaults.limits.max_source_bytes,
            )?,
        };

        let sandbox = SandboxSettings {
            image: lookup("DOCKER_IMAGE").unwrap_or(defaults.sandbox.image),
            memory_limit_mb: parse_or(
                &lookup,
                "GLIMPSE_SANDBOX_MEMORY_MB",
                defaults.sandbox.memory_limit_mb,
            )?,
            cpu_limit: parse_or(&lookup, "GLIMPSE_SANDBOX_CPUS", defaults.sandbox.cpu_limit)?,
            network_disabled: lookup("GLIMPSE_SANDBOX_NETWORK")
                .map(|mode| mode == "none")
                .unwrap_or(defaults.sandbox.network_disabled),
        };
        if sandbox.memory_limit_mb == 0 {
            anyhow::bail!("GLIMPSE_SANDBOX_MEMORY_MB must be at least 1");
        }
        if !(sandbox.cpu_limit.is_finite() && sandbox.cpu_limit > 0.0) {
            anyhow::bail!(
                "GLIMPSE_SANDBOX_CPUS must be a positive number, got {}",
                sandbox.cpu_limit
            );
        }

        Ok(Self {
            pool,
            limits,
            sandbox,
            workdir: lookup("GLIMPSE_WORKDIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.workdir),
            languages_file: lookup("GLIMPSE_LANGUAGES_FILE").map(PathBuf::from),
            bind_addr: lookup("GLIMPSE_BIND_ADDR").unwrap_or(defaults.bind_addr),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: '{}'", key, raw)),
        None => Ok(default),
    }
}

fn millis_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let ms: u64 = parse_or(lookup, key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(ms))
}
