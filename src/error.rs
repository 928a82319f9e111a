//! Error types for the shopwatch bot

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Shop API error: {0}")]
    Shop(String),

    #[error("Malformed upstream payload: {0}")]
    Payload(String),

    #[error("Monitor not found: {0}")]
    MonitorNotFound(i64),

    #[error("No stored credentials for user {0}")]
    NoCredentials(i64),

    #[error("Telegram API error: {0}")]
    Telegram(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BotError>;
