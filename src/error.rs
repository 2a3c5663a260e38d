use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Errors that stop a run (or a command) outright.
/// Anything that only loses a single doctor is a [`FetchError`] instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("The selector you are trying to scrape for is missing. Selector: {0}")]
    ParseMissingSelector(String),

    #[error("No specialties found on the landing page: {0}")]
    NoSpecialties(String),
    #[error("Specialty index {index} is out of range (0-{last})", last = .len.saturating_sub(1))]
    SpecialtyIndexOutOfRange { index: usize, len: usize },
    #[error("Store directory is not writable: {}: {source}", .path.display())]
    StoreDirUnwritable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Existing store {} can't be read: {source}", .path.display())]
    StoreUnreadable { path: PathBuf, source: Box<Error> },

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Csv Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Url Error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Fetch Error: {0}")]
    Fetch(#[from] FetchError),
}

/// A failed fetch. Callers skip the item and keep going.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Timed out fetching {url}")]
    Timeout { url: String },
    #[error("Connection failed for {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("Request failed for {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Gave up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: Box<FetchError>,
    },
    #[error("Local file not found: {0}")]
    LocalMissing(String),
    #[error("Couldn't read local file {}: {source}", .path.display())]
    LocalRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Timeouts, refused/reset connections and 5xx answers are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Connect { .. } => true,
            FetchError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let url = url.to_string();
        if err.is_timeout() {
            FetchError::Timeout { url }
        } else if err.is_connect() {
            FetchError::Connect { url, source: err }
        } else if let Some(status) = err.status() {
            FetchError::Status {
                url,
                status: status.as_u16(),
            }
        } else {
            FetchError::Request { url, source: err }
        }
    }
}
