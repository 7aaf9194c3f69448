use thiserror::Error;

pub type Result<T> = std::result::Result<T, AqError>;

#[derive(Debug, Error)]
pub enum AqError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Other(String),
}
