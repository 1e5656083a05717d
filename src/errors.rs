use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Keychain(#[from] keyring::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("API key missing; set env var {env_var} before running")]
    MissingCredentials { env_var: String },
    #[error("{0}")]
    Parse(String),
    #[error("{0}")]
    Config(String),
    #[error("upstream service failed: {0}")]
    Upstream(String),
}
