use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML deserialization failed: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid timestamp: {0}")]
    Time(#[from] chrono::ParseError),

    #[error("invalid CAP payload: {0}")]
    Cap(String),

    #[error("feed error: {0}")]
    Feed(String),

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;
