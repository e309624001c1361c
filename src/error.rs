use thiserror::Error;

/// Main error type for Wikinet
#[derive(Error, Debug)]
pub enum WikinetError {
    /// Cache database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors for checkpoints and exports
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors (invalid budgets, unknown relation scope, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote lookup failed after exhausting retries, or with a non-retryable status
    #[error("Remote unavailable: {endpoint} ({}): {detail}", status_label(.status))]
    RemoteUnavailable {
        endpoint: String,
        status: Option<u16>,
        detail: String,
    },

    /// A remote response could not be decoded into the expected shape
    #[error("Malformed response from {endpoint}: {detail}")]
    MalformedResponse { endpoint: String, detail: String },

    /// A fetched fact is missing required fields
    #[error("Malformed fact: {0}")]
    MalformedFact(String),

    /// Seed lookup produced zero candidates
    #[error("Unresolved seed: {0}")]
    UnresolvedSeed(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl WikinetError {
    /// True for failures of the remote layer that the crawl may skip past.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            WikinetError::RemoteUnavailable { .. } | WikinetError::MalformedResponse { .. }
        )
    }
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "transport".to_string(),
    }
}

/// Convenient Result type using WikinetError
pub type Result<T> = std::result::Result<T, WikinetError>;
