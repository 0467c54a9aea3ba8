use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Policy denied: {0}")]
    PolicyDenied(String),

    #[error("No extension connected")]
    NoAgent,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Unknown element: {0}")]
    UnknownElement(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
