use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{tool} failed with status {status:?}: {stderr}")]
    Tool {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to parse {tool} output: {detail}")]
    Parse { tool: String, detail: String },
}

pub type MediaResult<T> = Result<T, MediaError>;
