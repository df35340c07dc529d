/// Docker-backed sandbox runtime using Bollard
///
/// **Container rules:**
/// 1. Pulls the base image once if it is not cached locally
/// 2. Creates each sandbox detached, with a keep-alive command so it idles
///    until commands are exec'd into it
/// 3. Applies memory, CPU and pid limits; networking is disabled unless
///    configured otherwise
/// 4. Destroying a sandbox is a forced remove (kills anything still running)
use crate::runtime::{AttachedExec, ExecOutput, SandboxRuntime};
use crate::stream::DuplexStream;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use glimpse_common::config::SandboxSettings;
use std::collections::HashMap;
use std::io;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const SANDBOX_WORKDIR: &str = "/tmp";
const PIDS_LIMIT: i64 = 256;
const EXIT_CODE_POLLS: u32 = 20;
const EXIT_CODE_POLL_INTERVAL: Duration = Duration::from_millis(25);

fn log_bytes(output: LogOutput) -> Vec<u8> {
    match output {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::StdIn { message }
        | LogOutput::Console { message } => message.to_vec(),
    }
}

fn push_bounded(buffer: &mut Vec<u8>, chunk: &[u8], max: usize) {
    let room = max.saturating_sub(buffer.len());
    buffer.extend_from_slice(&chunk[..chunk.len().min(room)]);
}

pub struct DockerRuntime {
    docker: Docker,
    settings: SandboxSettings,
    max_output_bytes: usize,
    image_ready: OnceCell<()>,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon
    pub fn connect(settings: SandboxSettings, max_output_bytes: usize) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;

        Ok(Self {
            docker,
            settings,
            max_output_bytes,
            image_ready: OnceCell::new(),
        })
    }

    pub fn image(&self) -> &str {
        &self.settings.image
    }

    /// Ensure the base image is available (pull if needed)
    async fn ensure_image(&self) -> Result<()> {
        self.image_ready
            .get_or_try_init(|| async {
                let image = self.settings.image.as_str();
                if self.docker.inspect_image(image).await.is_ok() {
                    debug!(image = image, "Image cache hit");
                    return Ok(());
                }

                warn!(image = image, "Image cache miss, pulling");
                let options = Some(CreateImageOptions {
                    from_image: image,
                    ..Default::default()
                });
                let mut stream = self.docker.create_image(options, None, None);
                while let Some(result) = stream.next().await {
                    result.context("Failed to pull Docker image")?;
                }

                info!(image = image, "Image pulled");
                Ok::<(), anyhow::Error>(())
            })
            .await
            .map(|_| ())
    }

    fn container_config(&self) -> Config<String> {
        let mut labels = HashMap::new();
        labels.insert("glimpse.sandbox".to_string(), "true".to_string());

        Config {
            image: Some(self.settings.image.clone()),
            // idle until commands are exec'd in
            cmd: Some(vec![
                "tail".to_string(),
                "-f".to_string(),
                "/dev/null".to_string(),
            ]),
            working_dir: Some(SANDBOX_WORKDIR.to_string()),
            network_disabled: Some(self.settings.network_disabled),
            labels: Some(labels),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(i64::from(self.settings.memory_limit_mb) * 1024 * 1024),
                nano_cpus: Some((f64::from(self.settings.cpu_limit) * 1_000_000_000.0) as i64),
                pids_limit: Some(PIDS_LIMIT),
                readonly_rootfs: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn create_exec(
        &self,
        sandbox_id: &str,
        argv: Vec<String>,
        env: Vec<String>,
        attach_stdin: bool,
    ) -> Result<String> {
        let exec_config = CreateExecOptions {
            cmd: Some(argv),
            env: Some(env),
            attach_stdin: Some(attach_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(SANDBOX_WORKDIR.to_string()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(sandbox_id, exec_config)
            .await
            .with_context(|| format!("Failed to create exec in sandbox {}", sandbox_id))?;
        Ok(exec.id)
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    async fn create(&self) -> Result<String> {
        self.ensure_image()
            .await
            .with_context(|| format!("Failed to ensure Docker image '{}'", self.settings.image))?;

        let container_name = format!("glimpse-{}", uuid::Uuid::new_v4());
        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), self.container_config())
            .await
            .context("Failed to create Docker container")?;

        if let Err(e) = self
            .docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
        {
            // don't leave a created-but-stopped container behind
            if let Err(cleanup) = self.destroy(&container.id).await {
                warn!(sandbox_id = %container.id, error = %cleanup, "Failed to remove unstarted container");
            }
            return Err(e).context("Failed to start Docker container");
        }

        debug!(sandbox_id = %container.id, name = %container_name, "Container started");
        Ok(container.id)
    }

    async fn destroy(&self, sandbox_id: &str) -> Result<()> {
        let remove_options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker
            .remove_container(sandbox_id, Some(remove_options))
            .await
            .with_context(|| format!("Failed to remove container {}", sandbox_id))
    }

    async fn exec(
        &self,
        sandbox_id: &str,
        argv: Vec<String>,
        env: Vec<String>,
    ) -> Result<ExecOutput> {
        let exec_id = self.create_exec(sandbox_id, argv, env, false).await?;

        let start_config = StartExecOptions {
            detach: false,
            ..Default::default()
        };
        let started = self
            .docker
            .start_exec(&exec_id, Some(start_config))
            .await
            .context("Failed to start exec")?;

        let mut captured = ExecOutput::default();
        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(msg) = output.next().await {
                match msg.context("Failed to read exec output")? {
                    LogOutput::StdErr { message } => {
                        push_bounded(&mut captured.stderr, &message, self.max_output_bytes)
                    }
                    other => {
                        push_bounded(&mut captured.stdout, &log_bytes(other), self.max_output_bytes)
                    }
                }
            }
        } else {
            bail!("Exec {} started detached, expected attached output", exec_id);
        }

        captured.exit_code = self.exit_code(&exec_id).await?;
        Ok(captured)
    }

    async fn attach(
        &self,
        sandbox_id: &str,
        argv: Vec<String>,
        env: Vec<String>,
    ) -> Result<AttachedExec> {
        let exec_id = self.create_exec(sandbox_id, argv, env, true).await?;

        let start_config = StartExecOptions {
            detach: false,
            ..Default::default()
        };
        match self
            .docker
            .start_exec(&exec_id, Some(start_config))
            .await
            .context("Failed to start attached exec")?
        {
            StartExecResults::Attached { output, input } => {
                let output = output
                    .map(|item| match item {
                        Ok(log) => Ok(log_bytes(log)),
                        Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
                    })
                    .boxed();
                Ok(AttachedExec {
                    exec_id,
                    stream: DuplexStream::new(input, output, self.max_output_bytes),
                })
            }
            StartExecResults::Detached => {
                bail!("Exec {} started detached, expected attached stream", exec_id)
            }
        }
    }

    async fn exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        // the daemon can report the exec as running for a moment after its stream closes
        for _ in 0..EXIT_CODE_POLLS {
            let inspect = self
                .docker
                .inspect_exec(exec_id)
                .await
                .with_context(|| format!("Failed to inspect exec {}", exec_id))?;
            if inspect.running != Some(true) {
                return Ok(inspect.exit_code);
            }
            tokio::time::sleep(EXIT_CODE_POLL_INTERVAL).await;
        }
        warn!(exec_id = exec_id, "Exec still reported running after its stream closed");
        Ok(None)
    }
}
