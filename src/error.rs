//! Error handling for the Hexapure data layer

use std::fmt;
use thiserror::Error;

/// Unified error type for the Hexapure data layer
#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP related errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Missing or malformed input, caught before anything leaves the process
    #[error("Validation error: {0}")]
    Validation(String),

    /// A mutation that would break an account invariant
    #[error("Policy violation: {0}")]
    Policy(String),

    /// Document store errors
    #[error("Database error: {0}")]
    Database(String),

    /// The targeted document does not exist
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Identity provider errors
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Serverless function or email provider errors
    #[error("Function error: {0}")]
    Function(String),

    /// Change feed errors
    #[error("Realtime error: {0}")]
    Realtime(String),

    /// Local persistent store errors
    #[error("Cache error: {0}")]
    Cache(String),

    /// Configuration errors
    #[error("Configuration error: Missing or invalid {0}")]
    Config(String),
}

impl Error {
    /// Create a new validation error
    pub fn validation<T: fmt::Display>(msg: T) -> Self {
        Error::Validation(msg.to_string())
    }

    /// Create a new policy error
    pub fn policy<T: fmt::Display>(msg: T) -> Self {
        Error::Policy(msg.to_string())
    }

    /// Create a new database error
    pub fn database<T: fmt::Display>(msg: T) -> Self {
        Error::Database(msg.to_string())
    }

    /// Create a new not-found error
    pub fn not_found(collection: &str, id: &str) -> Self {
        Error::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    /// Create a new authentication error
    pub fn auth<T: fmt::Display>(msg: T) -> Self {
        Error::Auth(msg.to_string())
    }

    /// Create a new function error
    pub fn function<T: fmt::Display>(msg: T) -> Self {
        Error::Function(msg.to_string())
    }

    /// Create a new realtime error
    pub fn realtime<T: fmt::Display>(msg: T) -> Self {
        Error::Realtime(msg.to_string())
    }

    /// Create a new cache error
    pub fn cache<T: fmt::Display>(msg: T) -> Self {
        Error::Cache(msg.to_string())
    }

    /// Create a new configuration error
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }

    /// Whether the failure happened locally, before any remote call was made
    pub fn is_local(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::Policy(_) | Error::Config(_))
    }

    /// Whether retrying the same action may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Http(_)
                | Error::Database(_)
                | Error::NotFound { .. }
                | Error::Function(_)
                | Error::Realtime(_)
        )
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;
