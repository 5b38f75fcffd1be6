//! Centralized error types for headwind.
//!
//! This module provides a typed error hierarchy that:
//! - Keeps transient failures (network, storage) recoverable by the caller
//! - Provides short messages suitable for a bike computer display
//! - Preserves full error context for logging

use thiserror::Error;

/// Status-like code reported for requests that never produced a response.
pub const SYNTHETIC_FAILURE_STATUS: u16 = 500;

/// Top-level application error type.
///
/// Use `user_message()` to get a display-appropriate message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Network(e) => e.user_message(),
            AppError::Storage(e) => e.user_message(),
            AppError::Config(e) => e.user_message(),
            AppError::Other(_) => "An unexpected error occurred.",
        }
    }
}

/// Network-related errors (HTTP, connectivity).
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl NetworkError {
    /// HTTP-like status for this failure.
    ///
    /// Failures without a usable server response (timeouts, connection errors,
    /// undecodable bodies) report [`SYNTHETIC_FAILURE_STATUS`].
    pub fn status_code(&self) -> u16 {
        match self {
            NetworkError::ServerError { status, .. } => *status,
            NetworkError::ConnectionFailed(_)
            | NetworkError::Timeout
            | NetworkError::InvalidResponse(_) => SYNTHETIC_FAILURE_STATUS,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            NetworkError::ConnectionFailed(_) => "No connection to the weather service.",
            NetworkError::Timeout => "Weather request timed out.",
            NetworkError::ServerError { status, .. } if *status >= 500 => {
                "Weather service is having issues."
            }
            NetworkError::ServerError { .. } => "Weather request was rejected.",
            NetworkError::InvalidResponse(_) => "Weather service sent an unexpected response.",
        }
    }
}

/// Persisted key-value storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O failed for {key}: {message}")]
    Io { key: String, message: String },

    #[error("Failed to encode {key}: {message}")]
    Encode { key: String, message: String },

    #[error("Stored value for {key} is corrupt: {message}")]
    Corrupt { key: String, message: String },
}

impl StorageError {
    pub fn user_message(&self) -> &'static str {
        match self {
            StorageError::Io { .. } => "Unable to access local data.",
            StorageError::Encode { .. } => "Unable to save local data.",
            StorageError::Corrupt { .. } => "Local data was unreadable and has been ignored.",
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
        }
    }
}

/// Extension trait for converting reqwest errors to our error types.
pub trait ReqwestErrorExt {
    fn into_network_error(self) -> NetworkError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_network_error(self) -> NetworkError {
        if self.is_timeout() {
            NetworkError::Timeout
        } else if self.is_decode() {
            NetworkError::InvalidResponse(self.to_string())
        } else if let Some(status) = self.status() {
            NetworkError::ServerError {
                status: status.as_u16(),
                message: self.to_string(),
            }
        } else {
            NetworkError::ConnectionFailed(self.to_string())
        }
    }
}
