use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::error::{AppError, Result};

/// One invocation of an external binary, built incrementally.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    binary: String,
    args: Vec<String>,
    description: String,
    /// Extra exit codes treated as success (mkvmerge uses 1 for warnings).
    tolerated_codes: Vec<i32>,
}

impl ToolCommand {
    pub fn new<S1: Into<String>, S2: Into<String>>(binary: S1, description: S2) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            description: description.into(),
            tolerated_codes: Vec::new(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    pub fn path_arg<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    pub fn tolerate_exit(mut self, code: i32) -> Self {
        self.tolerated_codes.push(code);
        self
    }

    /// Run the command, returning captured stdout.
    ///
    /// A missing binary or an unexpected exit code surfaces as a tool error
    /// carrying the tail of stderr.
    pub async fn execute(&self) -> Result<String> {
        debug!(binary = %self.binary, args = ?self.args, "{}", self.description);

        let output = Command::new(&self.binary)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| AppError::Tool {
                command: self.binary.clone(),
                exit_code: None,
                stderr_tail: format!("failed to launch: {}", e),
            })?;

        let code = output.status.code();
        let ok = output.status.success()
            || code.map_or(false, |c| self.tolerated_codes.contains(&c));
        if !ok {
            return Err(AppError::tool(self.binary.clone(), code, &output.stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_captures_stdout() {
        let out = ToolCommand::new("sh", "echo test")
            .arg("-c")
            .arg("echo hello")
            .execute()
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_execute_surfaces_stderr_and_code() {
        let err = ToolCommand::new("sh", "failing command")
            .arg("-c")
            .arg("echo boom >&2; exit 3")
            .execute()
            .await
            .unwrap_err();
        match err {
            AppError::Tool {
                command,
                exit_code,
                stderr_tail,
            } => {
                assert_eq!(command, "sh");
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr_tail, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_tolerated_exit_code_is_success() {
        let out = ToolCommand::new("sh", "warning exit")
            .arg("-c")
            .arg("echo fine; exit 1")
            .tolerate_exit(1)
            .execute()
            .await
            .unwrap();
        assert_eq!(out.trim(), "fine");
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let err = ToolCommand::new("definitely-not-a-real-binary", "nothing")
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Tool { exit_code: None, .. }));
    }
}
