use thiserror::Error;

/// Error kinds for dependency extraction. Callers distinguish process
/// failures (fall back to the regex scanner) from bad input.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Failed to parse command: {0}")]
    Parse(String),

    #[error("Execution error: {0}")]
    Execution(#[from] std::io::Error),

    #[error("Unsupported compiler: {0}")]
    UnsupportedCompiler(String),

    #[error("Process failed with exit code {code}: {stderr}")]
    ProcessFailed { code: i32, stderr: String },
}
