// On-disk materialization of submitted source code
use anyhow::{Context, Result};
use async_trait::async_trait;
use glimpse_common::types::Language;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

const SUBMISSIONS_DIR: &str = "submissions";
const OUTPUTS_DIR: &str = "outputs";

/// One execution attempt's source file and (optional) compiled artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub job_id: Uuid,
    pub language: Language,
    pub source_path: PathBuf,
    pub artifact_path: Option<PathBuf>,
}

impl Submission {
    /// `<job_id>.<ext>`, the name used both locally and inside a sandbox
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.job_id, self.language.id())
    }
}

/// Creates and deletes submission files.
///
/// Paths are namespaced by a fresh UUID per call, so concurrent requests
/// never collide and no locking is needed.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn create(&self, language: Language, code: &str) -> Result<Submission>;

    /// Where a compiled artifact for `job_id` should be written
    fn artifact_path(&self, job_id: Uuid, output_extension: &str) -> PathBuf;

    /// Delete the source file and, if any, the artifact. Absent files are fine.
    async fn remove(
        &self,
        job_id: Uuid,
        language: Language,
        output_extension: Option<&str>,
    ) -> Result<()>;
}

/// Filesystem store rooted at a working directory
#[derive(Debug, Clone)]
pub struct FsSubmissionStore {
    root: PathBuf,
}

impl FsSubmissionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn source_path(&self, job_id: Uuid, language: Language) -> PathBuf {
        self.root
            .join(SUBMISSIONS_DIR)
            .join(format!("{}.{}", job_id, language.id()))
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed submission file");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

#[async_trait]
impl SubmissionStore for FsSubmissionStore {
    async fn create(&self, language: Language, code: &str) -> Result<Submission> {
        fs::create_dir_all(self.root.join(SUBMISSIONS_DIR))
            .await
            .context("Failed to create submissions directory")?;
        fs::create_dir_all(self.root.join(OUTPUTS_DIR))
            .await
            .context("Failed to create outputs directory")?;

        let job_id = Uuid::new_v4();
        let source_path = self.source_path(job_id, language);
        fs::write(&source_path, code)
            .await
            .with_context(|| format!("Failed to write {}", source_path.display()))?;

        debug!(job_id = %job_id, path = %source_path.display(), bytes = code.len(), "Created submission");

        Ok(Submission {
            job_id,
            language,
            source_path,
            artifact_path: None,
        })
    }

    fn artifact_path(&self, job_id: Uuid, output_extension: &str) -> PathBuf {
        self.root
            .join(OUTPUTS_DIR)
            .join(format!("{}.{}", job_id, output_extension))
    }

    async fn remove(
        &self,
        job_id: Uuid,
        language: Language,
        output_extension: Option<&str>,
    ) -> Result<()> {
        let source = remove_if_present(&self.source_path(job_id, language)).await;
        let artifact = match output_extension {
            Some(ext) => remove_if_present(&self.artifact_path(job_id, ext)).await,
            None => Ok(()),
        };
        if let Err(e) = &artifact {
            warn!(job_id = %job_id, error = %e, "Failed to remove compiled artifact");
        }
        source.and(artifact)
    }
}

/// Removes a submission's files when dropped.
///
/// `remove` is the normal path; the `Drop` fallback covers early returns and
/// cancelled requests by spawning the removal on the current runtime.
pub struct SubmissionGuard {
    store: Arc<dyn SubmissionStore>,
    job_id: Uuid,
    language: Language,
    output_extension: Option<String>,
    armed: bool,
}

impl SubmissionGuard {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        submission: &Submission,
        output_extension: Option<String>,
    ) -> Self {
        Self {
            store,
            job_id: submission.job_id,
            language: submission.language,
            output_extension,
            armed: true,
        }
    }

    pub async fn remove(mut self) -> Result<()> {
        self.armed = false;
        self.store
            .remove(self.job_id, self.language, self.output_extension.as_deref())
            .await
    }
}

impl Drop for SubmissionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = Arc::clone(&self.store);
        let job_id = self.job_id;
        let language = self.language;
        let output_extension = self.output_extension.take();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store
                        .remove(job_id, language, output_extension.as_deref())
                        .await
                    {
                        warn!(job_id = %job_id, error = %e, "Failed to remove abandoned submission");
                    }
                });
            }
            Err(_) => warn!(job_id = %job_id, "Submission dropped outside a runtime, files left behind"),
        }
    }
}
