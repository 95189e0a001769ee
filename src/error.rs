//! Error types.
//!
//! # Taxonomy
//! - `ConfigError`: raised while building a middleware instance or loading
//!   the config file. Never raised at request time.
//! - `ForwardError`: raised by the forwarding engine for a single request and
//!   routed to the error handler (see `http::handlers`).
//!
//! Body transform failures are not errors at this level; the interceptor
//! logs them and leaves the structured body unset.

use axum::http::StatusCode;
use thiserror::Error;

use crate::config::validation::ValidationError;

/// Construction-time configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing \"target\" option, expected something like target = \"http://localhost:3000\"")]
    MissingTarget,

    #[error("invalid target '{target}': {message}")]
    InvalidTarget { target: String, message: String },

    #[error("invalid context, expected something like \"/api\" or [\"/api\", \"/ajax\"]")]
    InvalidContext,

    #[error("invalid context array, expected something like [\"/api\", \"/ajax\"] or [\"/api/**\", \"!**.html\"]")]
    InvalidContextArray,

    #[error("invalid glob pattern '{pattern}': {message}")]
    InvalidGlob { pattern: String, message: String },

    #[error("invalid pathRewrite rule '{pattern}': {message}")]
    InvalidRewriteRule { pattern: String, message: String },

    #[error("invalid router target for '{key}' -> '{target}': {message}")]
    InvalidRouterTarget {
        key: String,
        target: String,
        message: String,
    },

    #[error("invalid header '{name}': {message}")]
    InvalidHeader { name: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Classification of forwarding failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardErrorKind {
    /// Upstream sent something that is not valid HTTP.
    InvalidResponse,
    /// Connection dropped mid-exchange, or the upstream did not answer in time.
    ConnectionReset,
    /// Upstream host name did not resolve.
    HostNotFound,
    /// Upstream refused the connection.
    ConnectionRefused,
    /// A router produced a target that is not a URL.
    InvalidTarget,
    /// Target scheme the engine cannot speak.
    UnsupportedScheme,
    Other,
}

impl ForwardErrorKind {
    /// Short, stable error code used in logs and by the default error policy.
    pub fn code(&self) -> &'static str {
        match self {
            ForwardErrorKind::InvalidResponse => "HPE_INVALID",
            ForwardErrorKind::ConnectionReset => "ECONNRESET",
            ForwardErrorKind::HostNotFound => "ENOTFOUND",
            ForwardErrorKind::ConnectionRefused => "ECONNREFUSED",
            ForwardErrorKind::InvalidTarget => "EINVAL",
            ForwardErrorKind::UnsupportedScheme => "EPROTO",
            ForwardErrorKind::Other => "EUNKNOWN",
        }
    }

    /// Client-visible status under the default error policy.
    pub fn status(&self) -> StatusCode {
        let code = self.code();
        if code.starts_with("HPE_") {
            return StatusCode::BAD_GATEWAY;
        }
        match code {
            "ECONNRESET" | "ENOTFOUND" | "ECONNREFUSED" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A failure reported by the forwarding engine for one request.
#[derive(Debug, Clone, Error)]
#[error("{message} ({})", kind.code())]
pub struct ForwardError {
    pub kind: ForwardErrorKind,
    pub message: String,
}

impl ForwardError {
    pub fn new(kind: ForwardErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_mapping() {
        assert_eq!(ForwardErrorKind::InvalidResponse.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(ForwardErrorKind::ConnectionReset.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ForwardErrorKind::HostNotFound.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ForwardErrorKind::ConnectionRefused.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ForwardErrorKind::InvalidTarget.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ForwardErrorKind::Other.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_forward_error_display() {
        let err = ForwardError::new(ForwardErrorKind::ConnectionRefused, "connect failed");
        assert_eq!(err.to_string(), "connect failed (ECONNREFUSED)");
        assert_eq!(err.code(), "ECONNREFUSED");
    }
}
