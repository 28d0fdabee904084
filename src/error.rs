//! Error handling for the sync engine.
//!
//! Errors here are reserved for true faults. Expected outcomes (no library
//! match, no search candidates, verification SKIP) are modeled as typed
//! results on the components that produce them.

use thiserror::Error;

/// Main application error type
#[derive(Debug, Error)]
pub enum AppError {
    // Transient remote failures (retryable)
    #[error("Service unavailable: {service}")]
    ServiceUnavailable { service: String },

    #[error("Service error from {service}: {message}")]
    ServiceError { service: String, message: String },

    #[error("Rate limited by {service}")]
    RateLimited {
        service: String,
        retry_after: Option<u64>,
    },

    #[error("Request to {service} timed out")]
    Timeout { service: String },

    // Bad input
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Malformed response from {service}: {message}")]
    MalformedResponse { service: String, message: String },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    // Infrastructure
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Database query failed")]
    DatabaseFailed(#[from] sqlx::Error),

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("Invalid API key for {service}")]
    InvalidApiKey { service: String },

    #[error("Fingerprint tooling unavailable: {reason}")]
    FingerprintUnavailable { reason: String },

    #[error("Transfer daemon unreachable")]
    DaemonUnreachable,

    #[error("Internal error")]
    Internal { message: Option<String> },
}

impl AppError {
    /// Whether the failure is expected to clear on its own and is worth an
    /// inline retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::ServiceUnavailable { .. }
                | AppError::RateLimited { .. }
                | AppError::Timeout { .. }
        )
    }

    /// Stable machine-readable code, used in logs and event payloads.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            AppError::ServiceError { .. } => "SERVICE_ERROR",
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::Timeout { .. } => "TIMEOUT",
            AppError::InvalidInput { .. } => "INVALID_INPUT",
            AppError::MalformedResponse { .. } => "MALFORMED_RESPONSE",
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::ConfigError { .. } => "CONFIG_ERROR",
            AppError::DatabaseFailed(_) => "DATABASE_FAILED",
            AppError::Io(_) => "IO_ERROR",
            AppError::InvalidApiKey { .. } => "INVALID_API_KEY",
            AppError::FingerprintUnavailable { .. } => "FINGERPRINT_UNAVAILABLE",
            AppError::DaemonUnreachable => "DAEMON_UNREACHABLE",
            AppError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// User-facing message for banners and wishlist payloads.
    pub fn user_message(&self) -> String {
        match self {
            AppError::ServiceUnavailable { service } => {
                format!("{} is currently unavailable", service)
            }
            AppError::ServiceError { service, .. } => {
                format!("Error communicating with {}", service)
            }
            AppError::RateLimited { service, .. } => {
                format!("{} is rate limiting requests, slowing down", service)
            }
            AppError::Timeout { service } => format!("{} did not respond in time", service),
            AppError::InvalidInput { message } => message.clone(),
            AppError::MalformedResponse { service, .. } => {
                format!("{} returned an unreadable response", service)
            }
            AppError::NotFound { resource } => format!("{} not found", resource),
            AppError::ConfigError { message } => format!("Configuration problem: {}", message),
            AppError::InvalidApiKey { service } => match service.as_str() {
                "acoustid" => {
                    "Invalid AcoustID API key - get one from https://acoustid.org/new-application"
                        .to_string()
                }
                _ => format!("Invalid API key for {}", service),
            },
            AppError::FingerprintUnavailable { reason } => {
                format!("Audio verification disabled: {}", reason)
            }
            AppError::DaemonUnreachable => {
                "The download daemon is unreachable - check the slskd URL and API key".to_string()
            }
            _ => "An unexpected error occurred".to_string(),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let service = err
            .url()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "remote service".to_string());

        if err.is_timeout() {
            AppError::Timeout { service }
        } else if err.is_connect() {
            AppError::ServiceUnavailable { service }
        } else {
            AppError::ServiceError {
                service,
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::MalformedResponse {
            service: "json".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal {
            message: Some(err.to_string()),
        }
    }
}

/// Result type alias for application errors
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(AppError::Timeout {
            service: "slskd".into()
        }
        .is_transient());
        assert!(AppError::RateLimited {
            service: "spotify".into(),
            retry_after: Some(5)
        }
        .is_transient());
        assert!(!AppError::InvalidInput {
            message: "bad url".into()
        }
        .is_transient());
        assert!(!AppError::DaemonUnreachable.is_transient());
    }

    #[test]
    fn acoustid_key_message_is_specific() {
        let err = AppError::InvalidApiKey {
            service: "acoustid".into(),
        };
        assert!(err.user_message().contains("acoustid.org/new-application"));
    }
}
