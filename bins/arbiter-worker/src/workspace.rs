/// Execution Workspace - per-submission directory tree
///
/// Layout under `<tmp_root>/submission-<id>/`:
/// - `mount/`          source file and measurement harness, bound into the sandbox
/// - `mount/in/`       `test{NNN}.in` inputs
/// - `mount/out/`      `result{NNN}.out` / `error{NNN}.out` written by the sandbox
/// - `answers/`        `test{NNN}.out` expected outputs, never visible to the sandbox
///
/// The directory is owned by exactly one execution and removed on every exit
/// path through [`Workspace::cleanup`], with a drop guard as the fallback.
use crate::config::LanguageConfig;
use crate::error::{JudgeError, JudgeResult};
use crate::problem::ProblemDefinition;
use crate::settings::EngineOptions;
use arbiter_common::types::SubmissionRequest;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Largest accepted source file (1 MiB)
pub const MAX_SOURCE_BYTES: usize = 1024 * 1024;

const WORKSPACE_PREFIX: &str = "submission-";

/// Removes the workspace directory when dropped without an explicit `remove()`
struct WorkspaceGuard {
    path: PathBuf,
    armed: bool,
}

impl WorkspaceGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    async fn remove(mut self) {
        self.armed = false;
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            warn!(path = %self.path.display(), error = %e, "Failed to remove workspace");
        }
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                        warn!(path = %path.display(), error = %e, "Failed to remove abandoned workspace");
                    }
                });
            }
            Err(_) => {
                if let Err(e) = std::fs::remove_dir_all(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove abandoned workspace");
                }
            }
        }
    }
}

/// A staged submission, ready to be mounted into the sandbox
pub struct Workspace {
    root: PathBuf,
    mount: PathBuf,
    answers: PathBuf,
    /// Source file name inside `mount/`
    pub file_name: String,
    pub language: String,
    pub compiled: bool,
    /// Artifact reserved for the compile step of compiled languages
    pub artifact: Option<String>,
    pad_width: usize,
    guard: WorkspaceGuard,
}

/// `submission-<id>` with anything outside `[A-Za-z0-9_-]` replaced
pub fn directory_name(submission_id: &str) -> String {
    let sanitized: String = submission_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}{}", WORKSPACE_PREFIX, sanitized)
}

/// Width of the zero-padded test number: at least 3 digits
pub fn pad_width(test_count: usize) -> usize {
    test_count.to_string().len().max(3)
}

impl Workspace {
    /// Build the workspace for one submission.
    ///
    /// Anything created before a failure is removed before returning.
    pub async fn stage(
        options: &EngineOptions,
        request: &SubmissionRequest,
        language: &LanguageConfig,
        problem: &ProblemDefinition,
    ) -> JudgeResult<Self> {
        if request.source_code.len() > MAX_SOURCE_BYTES {
            return Err(JudgeError::invalid(format!(
                "source code is {} bytes, limit is {}",
                request.source_code.len(),
                MAX_SOURCE_BYTES
            )));
        }

        tokio::fs::create_dir_all(&options.tmp_root_path)
            .await
            .map_err(|e| JudgeError::io(format!("creating {}", options.tmp_root_path.display()), e))?;

        let root = options.tmp_root_path.join(directory_name(&request.id));
        if options.overwrite_tmp_path && tokio::fs::try_exists(&root).await.unwrap_or(false) {
            debug!(path = %root.display(), "Replacing leftover workspace");
            tokio::fs::remove_dir_all(&root)
                .await
                .map_err(|e| JudgeError::io(format!("removing leftover {}", root.display()), e))?;
        }

        // fails with AlreadyExists when a leftover is not to be overwritten
        tokio::fs::create_dir(&root)
            .await
            .map_err(|e| JudgeError::io(format!("creating workspace {}", root.display()), e))?;

        let workspace = Self {
            mount: root.join("mount"),
            answers: root.join("answers"),
            file_name: language.source_file_name(&options.base_file_name),
            language: request.language.clone(),
            compiled: language.compiled,
            artifact: language.artifact_name(&options.base_file_name),
            pad_width: pad_width(problem.test_count()),
            guard: WorkspaceGuard::new(root.clone()),
            root,
        };

        match workspace.populate(options, request, problem).await {
            Ok(()) => Ok(workspace),
            Err(e) => {
                workspace.cleanup().await;
                Err(e)
            }
        }
    }

    async fn populate(
        &self,
        options: &EngineOptions,
        request: &SubmissionRequest,
        problem: &ProblemDefinition,
    ) -> JudgeResult<()> {
        for dir in [self.mount.clone(), self.mount.join("in"), self.mount.join("out"), self.answers.clone()] {
            tokio::fs::create_dir(&dir)
                .await
                .map_err(|e| JudgeError::io(format!("creating {}", dir.display()), e))?;
        }

        self.copy_harness(&options.harness_dir).await?;

        let source_path = self.mount.join(&self.file_name);
        tokio::fs::write(&source_path, &request.source_code)
            .await
            .map_err(|e| JudgeError::io(format!("writing source {}", source_path.display()), e))?;

        for (index, test) in problem.test_cases.iter().enumerate() {
            let test_case = index as u32 + 1;
            let input = self.input_path(test_case);
            tokio::fs::write(&input, &test.input)
                .await
                .map_err(|e| JudgeError::io(format!("writing {}", input.display()), e))?;
            let answer = self.answer_path(test_case);
            tokio::fs::write(&answer, &test.output)
                .await
                .map_err(|e| JudgeError::io(format!("writing {}", answer.display()), e))?;
        }

        debug!(
            workspace = %self.root.display(),
            problem = %problem.name,
            file_name = %self.file_name,
            test_count = problem.test_count(),
            "Workspace staged"
        );
        Ok(())
    }

    /// Copy every regular file of the harness directory into `mount/`
    async fn copy_harness(&self, harness_dir: &Path) -> JudgeResult<()> {
        let mut entries = tokio::fs::read_dir(harness_dir)
            .await
            .map_err(|e| JudgeError::io(format!("reading harness {}", harness_dir.display()), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| JudgeError::io(format!("reading harness {}", harness_dir.display()), e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| JudgeError::io(format!("inspecting {}", entry.path().display()), e))?;
            if !file_type.is_file() {
                continue;
            }
            let target = self.mount.join(entry.file_name());
            tokio::fs::copy(entry.path(), &target)
                .await
                .map_err(|e| JudgeError::io(format!("copying harness file {}", entry.path().display()), e))?;
        }
        Ok(())
    }

    /// Remove the whole tree; failures are logged, never returned
    pub async fn cleanup(self) {
        self.guard.remove().await;
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mount(&self) -> &Path {
        &self.mount
    }

    /// Zero-padded test number as used in every per-test file name
    pub fn label(&self, test_case: u32) -> String {
        format!("{:0width$}", test_case, width = self.pad_width)
    }

    pub fn input_path(&self, test_case: u32) -> PathBuf {
        self.mount.join("in").join(format!("test{}.in", self.label(test_case)))
    }

    pub fn answer_path(&self, test_case: u32) -> PathBuf {
        self.answers.join(format!("test{}.out", self.label(test_case)))
    }

    pub fn result_path(&self, test_case: u32) -> PathBuf {
        self.mount.join("out").join(format!("result{}.out", self.label(test_case)))
    }

    pub fn error_path(&self, test_case: u32) -> PathBuf {
        self.mount.join("out").join(format!("error{}.out", self.label(test_case)))
    }
}
