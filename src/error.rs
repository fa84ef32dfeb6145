use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScraperError>;

/// Failure taxonomy for the scrape pipeline.
///
/// `Auth` is fatal to the current run attempt. `Fetch`, `Validation` and
/// `SinkWrite` are per-identifier / per-batch failures the run loop recovers
/// from by skipping and logging.
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("fetch failed for '{nickname}' after {attempts} attempts: {reason}")]
    Fetch {
        nickname: String,
        attempts: u32,
        reason: String,
    },

    #[error("invalid record for '{nickname}': {reason}")]
    Validation { nickname: String, reason: String },

    #[error("remote write failed for {count} record(s): {reason}")]
    SinkWrite { count: usize, reason: String },

    #[error("remote table error (status {status}): {message}")]
    Remote { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ScraperError {
    fn from(err: reqwest::Error) -> Self {
        ScraperError::Network(err.to_string())
    }
}
