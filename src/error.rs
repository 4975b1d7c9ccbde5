use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected response status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Failed to decode response body: {source}. body: {body}")]
    Decode {
        source: serde_json::Error,
        body: String,
    },

    #[error("Pagination did not terminate: {0}")]
    Pagination(String),

    #[error("Metrics encoding error: {0}")]
    Encoding(#[from] prometheus::Error),

    #[error("Refresh cycle skipped {0} scope(s)")]
    ScopesSkipped(usize),
}

impl ExporterError {
    /// Transport failures abort the whole refresh cycle; everything else is
    /// confined to the scope that produced it.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

pub type Result<T> = std::result::Result<T, ExporterError>;
