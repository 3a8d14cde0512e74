//! Unified error model for the session core.
//! Every failure surfaced to the UI layer is an `AuthError`; the variant decides
//! whether the session survives and where navigation goes next.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthError {
    /// No valid access token.
    #[error("unauthenticated: {message}")]
    Unauthenticated { message: String },
    /// Valid session, missing capability.
    #[error("forbidden: {message}")]
    Forbidden { message: String },
    /// The refresh endpoint rejected the refresh token (or could not be reached within the retry budget).
    #[error("refresh_failure: {message}")]
    RefreshFailure { message: String },
    /// The profile fetch failed after a token was presented.
    #[error("hydration_failure: {message}")]
    HydrationFailure { message: String },
    #[error("transient_network_failure: {message}")]
    TransientNetwork { message: String },
    /// Non-401 HTTP failure surfaced by `ApiResponse::error_for_status`.
    #[error("http_{status}: {message}")]
    Status { status: u16, message: String },
    #[error("decode_error: {message}")]
    Decode { message: String },
    #[error("config_error: {message}")]
    Config { message: String },
}

/// Convenience alias used throughout the crate.
pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    pub fn code_str(&self) -> &'static str {
        match self {
            AuthError::Unauthenticated { .. } => "unauthenticated",
            AuthError::Forbidden { .. } => "forbidden",
            AuthError::RefreshFailure { .. } => "refresh_failure",
            AuthError::HydrationFailure { .. } => "hydration_failure",
            AuthError::TransientNetwork { .. } => "transient_network_failure",
            AuthError::Status { .. } => "http_status",
            AuthError::Decode { .. } => "decode_error",
            AuthError::Config { .. } => "config_error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AuthError::Unauthenticated { message }
            | AuthError::Forbidden { message }
            | AuthError::RefreshFailure { message }
            | AuthError::HydrationFailure { message }
            | AuthError::TransientNetwork { message }
            | AuthError::Status { message, .. }
            | AuthError::Decode { message }
            | AuthError::Config { message } => message.as_str(),
        }
    }

    pub fn unauthenticated<S: Into<String>>(msg: S) -> Self { AuthError::Unauthenticated { message: msg.into() } }
    pub fn forbidden<S: Into<String>>(msg: S) -> Self { AuthError::Forbidden { message: msg.into() } }
    pub fn refresh<S: Into<String>>(msg: S) -> Self { AuthError::RefreshFailure { message: msg.into() } }
    pub fn hydration<S: Into<String>>(msg: S) -> Self { AuthError::HydrationFailure { message: msg.into() } }
    pub fn transient<S: Into<String>>(msg: S) -> Self { AuthError::TransientNetwork { message: msg.into() } }
    pub fn status<S: Into<String>>(status: u16, msg: S) -> Self { AuthError::Status { status, message: msg.into() } }
    pub fn decode<S: Into<String>>(msg: S) -> Self { AuthError::Decode { message: msg.into() } }
    pub fn config<S: Into<String>>(msg: S) -> Self { AuthError::Config { message: msg.into() } }

    /// HTTP status the UI layer should associate with this failure.
    pub fn http_status(&self) -> u16 {
        match self {
            AuthError::Unauthenticated { .. } => 401,
            AuthError::Forbidden { .. } => 403,
            AuthError::RefreshFailure { .. } => 401,
            AuthError::HydrationFailure { .. } => 401,
            AuthError::TransientNetwork { .. } => 503,
            AuthError::Status { status, .. } => *status,
            AuthError::Decode { .. } => 502,
            AuthError::Config { .. } => 500,
        }
    }

    /// Failures that make the session unusable and require a full teardown.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthError::RefreshFailure { .. } | AuthError::HydrationFailure { .. })
    }

    pub fn redirects_to_login(&self) -> bool {
        self.is_terminal() || matches!(self, AuthError::Unauthenticated { .. })
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AuthError::decode(err.to_string())
        } else {
            AuthError::transient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::decode(err.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
