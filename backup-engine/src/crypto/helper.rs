//! Invocation of the external encryption executable.
//!
//! The helper is called as `exe <-c|-d> <file> <password> <targetDir>`. Exit
//! code 0 is success; its output is captured for debugging only.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use super::CryptoOperation;
use crate::config::EncryptionConfig;
use crate::EngineError;

/// Result codes reported by the encryption queue. Non-negative codes are the
/// elapsed milliseconds of a successful call.
pub const EXECUTABLE_NOT_FOUND: i64 = -1;
pub const SPAWN_FAILED: i64 = -2;
pub const TIMED_OUT: i64 = -3;
pub const UNEXPECTED_FAILURE: i64 = -999;

#[derive(Error, Debug)]
pub enum HelperError {
    #[error("encryption helper not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to start encryption helper: {0}")]
    SpawnFailed(std::io::Error),

    #[error("encryption helper timed out after {0:?}")]
    TimedOut(Duration),

    #[error("encryption helper exited with code {0}")]
    ExitCode(i32),

    #[error("encryption helper failed: {0}")]
    Unexpected(String),
}

impl HelperError {
    /// Sentinel code for the queue contract.
    pub fn code(&self) -> i64 {
        match self {
            HelperError::NotFound(_) => EXECUTABLE_NOT_FOUND,
            HelperError::SpawnFailed(_) => SPAWN_FAILED,
            HelperError::TimedOut(_) => TIMED_OUT,
            HelperError::ExitCode(code) => -i64::from(*code).abs(),
            HelperError::Unexpected(_) => UNEXPECTED_FAILURE,
        }
    }
}

/// Convert a queue result code into the engine's error model.
pub fn code_to_result(code: i64) -> crate::Result<Duration> {
    match code {
        c if c >= 0 => Ok(Duration::from_millis(c as u64)),
        EXECUTABLE_NOT_FOUND => Err(EngineError::Configuration(
            "encryption helper executable not found".into(),
        )),
        TIMED_OUT => Err(EngineError::QueueTimeout),
        SPAWN_FAILED => Err(EngineError::ExternalProcess {
            code,
            message: "encryption helper failed to start".into(),
        }),
        UNEXPECTED_FAILURE => Err(EngineError::ExternalProcess {
            code,
            message: "unexpected encryption helper failure".into(),
        }),
        c => Err(EngineError::ExternalProcess {
            code: c,
            message: format!("encryption helper exited with code {}", -c),
        }),
    }
}

#[derive(Debug, Clone)]
pub struct ExternalHelper {
    executable: PathBuf,
    timeout: Duration,
}

impl ExternalHelper {
    pub fn new(executable: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            timeout,
        }
    }

    pub fn from_config(config: &EncryptionConfig) -> Self {
        Self::new(config.executable.clone(), config.process_timeout())
    }

    /// Run one helper invocation to completion, killing it on timeout.
    pub async fn invoke(
        &self,
        operation: CryptoOperation,
        file: &Path,
        password: &str,
        target_dir: &Path,
    ) -> Result<Duration, HelperError> {
        let program = self
            .resolve()
            .ok_or_else(|| HelperError::NotFound(self.executable.clone()))?;

        let started = Instant::now();
        let child = Command::new(&program)
            .arg(operation.flag())
            .arg(file)
            .arg(password)
            .arg(target_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(HelperError::SpawnFailed)?;

        // Dropping the wait future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(HelperError::Unexpected(e.to_string())),
            Err(_) => return Err(HelperError::TimedOut(self.timeout)),
        };

        debug!(
            "Helper {} {} finished with {}: stdout={:?} stderr={:?}",
            operation,
            file.display(),
            output.status,
            String::from_utf8_lossy(&output.stdout).trim(),
            String::from_utf8_lossy(&output.stderr).trim(),
        );

        if output.status.success() {
            return Ok(started.elapsed());
        }

        match output.status.code() {
            Some(code) => Err(HelperError::ExitCode(code)),
            None => Err(HelperError::Unexpected(format!(
                "terminated without exit code ({})",
                output.status
            ))),
        }
    }

    /// Locate the executable, searching PATH for bare program names.
    fn resolve(&self) -> Option<PathBuf> {
        if self.executable.components().count() > 1 || self.executable.is_absolute() {
            return self.executable.is_file().then(|| self.executable.clone());
        }

        let path = std::env::var_os("PATH")?;
        std::env::split_paths(&path)
            .map(|dir| dir.join(&self.executable))
            .find(|candidate| candidate.is_file())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::write_script;
    use tempfile::TempDir;

    #[test]
    fn test_error_codes() {
        assert_eq!(HelperError::NotFound(PathBuf::from("x")).code(), -1);
        assert_eq!(
            HelperError::SpawnFailed(std::io::Error::from(std::io::ErrorKind::PermissionDenied)).code(),
            -2
        );
        assert_eq!(HelperError::TimedOut(Duration::from_secs(1)).code(), -3);
        assert_eq!(HelperError::ExitCode(5).code(), -5);
        assert_eq!(HelperError::ExitCode(-7).code(), -7);
        assert_eq!(HelperError::Unexpected("boom".into()).code(), -999);
    }

    #[test]
    fn test_code_to_result() {
        assert_eq!(code_to_result(120).unwrap(), Duration::from_millis(120));
        assert!(matches!(code_to_result(-1), Err(EngineError::Configuration(_))));
        assert!(matches!(code_to_result(-3), Err(EngineError::QueueTimeout)));
        assert!(matches!(
            code_to_result(-42),
            Err(EngineError::ExternalProcess { code: -42, .. })
        ));
        assert!(matches!(
            code_to_result(-999),
            Err(EngineError::ExternalProcess { code: -999, .. })
        ));
    }

    #[tokio::test]
    async fn test_successful_invocation_passes_arguments() {
        let dir = TempDir::new().unwrap();
        let args_log = dir.path().join("args.log");
        let script = write_script(
            dir.path(),
            "helper.sh",
            &format!("echo \"$1|$2|$3|$4\" > '{}'\nexit 0", args_log.display()),
        );
        let source = dir.path().join("secret.enc");
        std::fs::write(&source, b"data").unwrap();

        let helper = ExternalHelper::new(&script, Duration::from_secs(10));
        let elapsed = helper
            .invoke(CryptoOperation::Encrypt, &source, "pw", dir.path())
            .await
            .unwrap();
        assert!(elapsed < Duration::from_secs(10));

        let logged = std::fs::read_to_string(&args_log).unwrap();
        assert_eq!(
            logged.trim(),
            format!("-c|{}|pw|{}", source.display(), dir.path().display())
        );
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let dir = TempDir::new().unwrap();
        let helper = ExternalHelper::new(dir.path().join("nope"), Duration::from_secs(1));

        let err = helper
            .invoke(CryptoOperation::Decrypt, dir.path(), "pw", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, HelperError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "fail.sh", "echo oops >&2\nexit 5");
        let helper = ExternalHelper::new(&script, Duration::from_secs(10));

        let err = helper
            .invoke(CryptoOperation::Encrypt, dir.path(), "pw", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, HelperError::ExitCode(5)));
        assert_eq!(err.code(), -5);
    }

    #[tokio::test]
    async fn test_timeout_kills_helper() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "slow.sh", "sleep 5");
        let helper = ExternalHelper::new(&script, Duration::from_millis(200));

        let started = Instant::now();
        let err = helper
            .invoke(CryptoOperation::Encrypt, dir.path(), "pw", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, HelperError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
