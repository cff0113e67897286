use thiserror::Error;

/// Maximum stderr carried into a tool error message.
pub const STDERR_TAIL_LIMIT: usize = 1024;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Invalid request from a caller; never produces a task.
    #[error("invalid request: {0}")]
    User(String),

    /// Non-zero exit from an external binary (ffmpeg, ffprobe, mkvmerge).
    #[error("{command} failed: {stderr_tail}")]
    Tool {
        command: String,
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    /// Unparseable or unsupported subtitle content.
    #[error("subtitle error: {0}")]
    Codec(String),

    /// Network failure, 429/5xx, timeout. Retried with backoff.
    #[error("transient error: {0}")]
    Transient(String),

    /// LLM credential failure (401/403). Never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Invariant violation, e.g. translation count mismatch after halving.
    #[error("inconsistent result: {0}")]
    Consistency(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Build a tool error from captured process output, keeping only the
    /// last [`STDERR_TAIL_LIMIT`] bytes of stderr.
    pub fn tool(command: impl Into<String>, exit_code: Option<i32>, stderr: &[u8]) -> Self {
        let text = String::from_utf8_lossy(stderr);
        let trimmed = text.trim();
        let tail = if trimmed.len() > STDERR_TAIL_LIMIT {
            let cut = trimmed.len() - STDERR_TAIL_LIMIT;
            // Avoid slicing inside a UTF-8 sequence.
            let start = (cut..trimmed.len())
                .find(|&i| trimmed.is_char_boundary(i))
                .unwrap_or(trimmed.len());
            trimmed[start..].to_string()
        } else {
            trimmed.to_string()
        };
        AppError::Tool {
            command: command.into(),
            exit_code,
            stderr_tail: tail,
        }
    }

    /// Whether the pipeline should retry this error with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
