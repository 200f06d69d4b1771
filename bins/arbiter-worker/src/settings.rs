// Worker configuration: flags with environment fallbacks
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "arbiter-worker")]
#[command(about = "Arbiter worker - judges submissions inside a sandboxed container runtime", long_about = None)]
pub struct WorkerConfig {
    /// Root of the problem repository
    #[arg(long, env = "REPO_PATH", default_value = "..")]
    pub repo_path: PathBuf,

    /// Problem-set directory under the repository (contests use a private set)
    #[arg(long, env = "PROBLEM_DIR", default_value = "problems")]
    pub problem_dir: String,

    /// Maximum number of submissions executing at once
    #[arg(long, env = "EXECUTING_LIMIT", default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub executing_limit: u64,

    /// Root directory for per-submission workspaces
    #[arg(long, env = "TMP_ROOT_PATH", default_value = "/tmp/arbiter")]
    pub tmp_root_path: PathBuf,

    /// Replace a leftover workspace instead of failing the submission
    #[arg(long, env = "OVERWRITE_TMP_PATH", default_value_t = false, action = ArgAction::Set)]
    pub overwrite_tmp_path: bool,

    /// Base name of the staged source file
    #[arg(long, env = "BASE_FILE_NAME", default_value = "Solution")]
    pub base_file_name: String,

    /// Check the sandbox runtime before accepting work
    #[arg(long, env = "CHECK_SANDBOX", default_value_t = true, action = ArgAction::Set)]
    pub check_sandbox: bool,

    /// Container runtime binary
    #[arg(long, env = "SANDBOX_BINARY", default_value = "podman")]
    pub sandbox_binary: String,

    /// Sandbox image holding the execution script
    #[arg(long, env = "SANDBOX_IMAGE", default_value = "arbiter-sandbox")]
    pub sandbox_image: String,

    /// Resource-measurement harness, relative to the repository unless absolute
    #[arg(long, env = "HARNESS_DIR", default_value = "tools/measurer")]
    pub harness_dir: PathBuf,

    /// Stored sandbox instances beyond which no new work is started
    #[arg(long, env = "MAX_SANDBOX_INSTANCES", default_value_t = 2000)]
    pub max_sandbox_instances: usize,

    /// Wall-clock ceiling for one sandbox run
    #[arg(long, env = "SANDBOX_WATCHDOG_SECS", default_value_t = 300)]
    pub sandbox_watchdog_secs: u64,

    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,
}

/// How the sandbox runtime is reached and bounded
#[derive(Debug, Clone)]
pub struct SandboxOptions {
    pub binary: String,
    pub image: String,
    pub check: bool,
    pub max_instances: usize,
    pub watchdog: Duration,
}

/// Everything one execution needs, independent of how it was configured
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// `<repo>/<problem_dir>`: holds the language registry and one directory per problem
    pub problems_root: PathBuf,
    pub tmp_root_path: PathBuf,
    pub overwrite_tmp_path: bool,
    pub base_file_name: String,
    pub harness_dir: PathBuf,
    pub sandbox: SandboxOptions,
}

impl WorkerConfig {
    pub fn executing_limit(&self) -> usize {
        self.executing_limit as usize
    }

    pub fn engine_options(&self) -> EngineOptions {
        let harness_dir = if self.harness_dir.is_absolute() {
            self.harness_dir.clone()
        } else {
            self.repo_path.join(&self.harness_dir)
        };

        EngineOptions {
            problems_root: self.repo_path.join(&self.problem_dir),
            tmp_root_path: self.tmp_root_path.clone(),
            overwrite_tmp_path: self.overwrite_tmp_path,
            base_file_name: self.base_file_name.clone(),
            harness_dir,
            sandbox: SandboxOptions {
                binary: self.sandbox_binary.clone(),
                image: self.sandbox_image.clone(),
                check: self.check_sandbox,
                max_instances: self.max_sandbox_instances,
                watchdog: Duration::from_secs(self.sandbox_watchdog_secs),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let config = WorkerConfig::try_parse_from([
            "arbiter-worker",
            "--repo-path",
            "/srv/repo",
            "--problem-dir",
            "problems-private",
            "--executing-limit",
            "4",
            "--overwrite-tmp-path",
            "true",
            "--check-sandbox",
            "false",
        ])
        .unwrap();

        assert_eq!(config.executing_limit(), 4);
        assert!(config.overwrite_tmp_path);

        let options = config.engine_options();
        assert_eq!(options.problems_root, PathBuf::from("/srv/repo/problems-private"));
        assert_eq!(options.harness_dir, PathBuf::from("/srv/repo/tools/measurer"));
        assert!(!options.sandbox.check);
    }

    #[test]
    fn test_absolute_harness_dir_kept() {
        let config = WorkerConfig::try_parse_from([
            "arbiter-worker",
            "--harness-dir",
            "/opt/harness",
        ])
        .unwrap();

        assert_eq!(config.engine_options().harness_dir, PathBuf::from("/opt/harness"));
    }

    #[test]
    fn test_zero_executing_limit_rejected() {
        let result = WorkerConfig::try_parse_from(["arbiter-worker", "--executing-limit", "0"]);
        assert!(result.is_err());
    }
}
