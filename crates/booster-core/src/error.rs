use thiserror::Error;

#[derive(Debug, Error)]
pub enum BoosterError {
    #[error("request to {url} failed after {attempts} attempts: {reason}")]
    RequestFailed {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("malformed payload from {url}: {reason}")]
    MalformedPayload { url: String, reason: String },

    #[error("no origination sinks configured")]
    NoOriginationSinks,

    #[error("chart store lock poisoned")]
    StorePoisoned,

    #[error("config not found: {0}")]
    ConfigNotFound(String),

    #[error("http client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BoosterError>;
