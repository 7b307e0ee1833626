use thiserror::Error;

#[derive(Error, Debug)]
pub enum SynclipError {
    #[error("Audio decode failed: {0}")]
    Decode(String),

    #[error("Audio track has zero duration")]
    EmptyTrack,

    #[error("Media encode failed: {0}")]
    Encode(String),

    #[error("Identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Identity rejected by remote service: {address}")]
    InvalidIdentity { address: String },

    #[error("Job submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("Remote job failed: {0}")]
    JobFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("No result artifacts to assemble")]
    NoInputs,

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SynclipError>;
