//! Running per-example setup, verification and cleanup scripts.
//!
//! Scripts are made executable and run directly (they need a shebang)
//! with the inherited environment, plus `KUBECONFIG` when a kubeconfig is
//! configured.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Errors from running a script.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScriptError {
    /// Script path does not name a file
    #[error("Script not found: {0:?}")]
    NotFound(PathBuf),

    /// Configured kubeconfig does not exist
    #[error("Kubeconfig not found: {0:?}")]
    KubeconfigNotFound(PathBuf),

    /// Script could not be started
    #[error("Failed to run {path:?}: {error}")]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },

    /// Script did not finish in time
    #[error("Script {path:?} timed out after {timeout:?}")]
    Timeout { path: PathBuf, timeout: Duration },

    /// Script exited unsuccessfully
    #[error("Script {path:?} exited with {status}: {stderr}")]
    Failed {
        path: PathBuf,
        status: String,
        stderr: String,
    },
}

/// Captured result of a finished script.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ScriptOutput {
    /// Whether the script exited with status 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn status_text(&self) -> String {
        match self.code {
            Some(code) => format!("code {}", code),
            None => "signal".to_string(),
        }
    }
}

/// Runs scripts for examples.
#[derive(Debug, Clone, Default)]
pub struct ScriptRunner {
    kubeconfig: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ScriptRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export `KUBECONFIG` to scripts.
    #[must_use]
    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Kill scripts that run longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run a script and capture its output, whatever its exit status.
    pub async fn run(&self, path: &Path) -> Result<ScriptOutput, ScriptError> {
        if !path.is_file() {
            return Err(ScriptError::NotFound(path.to_path_buf()));
        }
        let script = std::path::absolute(path).map_err(|error| ScriptError::Io {
            path: path.to_path_buf(),
            error,
        })?;

        make_executable(&script).await?;

        let mut command = Command::new(&script);
        command.kill_on_drop(true);
        if let Some(parent) = script.parent() {
            command.current_dir(parent);
        }
        if let Some(kubeconfig) = &self.kubeconfig {
            if !kubeconfig.is_file() {
                return Err(ScriptError::KubeconfigNotFound(kubeconfig.clone()));
            }
            let kubeconfig = std::path::absolute(kubeconfig).map_err(|error| ScriptError::Io {
                path: kubeconfig.clone(),
                error,
            })?;
            command.env("KUBECONFIG", kubeconfig);
        }

        log::debug!("Running script {:?}", script);
        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, command.output())
                .await
                .map_err(|_| ScriptError::Timeout {
                    path: script.clone(),
                    timeout,
                })?,
            None => command.output().await,
        }
        .map_err(|error| ScriptError::Io {
            path: script.clone(),
            error,
        })?;

        Ok(ScriptOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Run a script and fail unless it exits with status 0.
    pub async fn run_checked(&self, path: &Path) -> Result<ScriptOutput, ScriptError> {
        let output = self.run(path).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(ScriptError::Failed {
                path: path.to_path_buf(),
                status: output.status_text(),
                stderr: output.stderr,
            })
        }
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<(), ScriptError> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|error| ScriptError::Io {
            path: path.to_path_buf(),
            error,
        })
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<(), ScriptError> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_run_success_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "ok.sh", "echo hello");

        let output = ScriptRunner::new().run(&script).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "hello");
    }

    #[tokio::test]
    async fn test_run_reports_failure_code() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "fail.sh", "echo broken >&2\nexit 3");

        let output = ScriptRunner::new().run(&script).await.unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stderr, "broken");

        let err = ScriptRunner::new().run_checked(&script).await.unwrap_err();
        assert!(matches!(err, ScriptError::Failed { .. }));
        assert!(err.to_string().contains("code 3"));
    }

    #[tokio::test]
    async fn test_missing_script() {
        let err = ScriptRunner::new()
            .run(Path::new("/nonexistent/script.sh"))
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_kubeconfig_exported() {
        let dir = tempfile::tempdir().unwrap();
        let kubeconfig = dir.path().join("kubeconfig");
        std::fs::write(&kubeconfig, "apiVersion: v1\n").unwrap();
        let script = write_script(dir.path(), "env.sh", "echo \"$KUBECONFIG\"");

        let output = ScriptRunner::new()
            .with_kubeconfig(&kubeconfig)
            .run(&script)
            .await
            .unwrap();
        assert_eq!(output.stdout, kubeconfig.to_string_lossy());
    }

    #[tokio::test]
    async fn test_missing_kubeconfig_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "ok.sh", "exit 0");

        let err = ScriptRunner::new()
            .with_kubeconfig(dir.path().join("missing"))
            .run(&script)
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::KubeconfigNotFound(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "slow.sh", "sleep 5");

        let err = ScriptRunner::new()
            .with_timeout(Duration::from_millis(100))
            .run(&script)
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Timeout { .. }));
    }
}
