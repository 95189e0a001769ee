//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that every URL and regex in the file compiles
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before the config is turned into a middleware instance

use std::net::SocketAddr;

use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("proxy.target is required")]
    MissingTarget,

    #[error("proxy.target '{0}' is not a valid URL")]
    InvalidTarget(String),

    #[error("listener.bind_address '{0}' is not a socket address")]
    InvalidBindAddress(String),

    #[error("observability.metrics_address '{0}' is not a socket address")]
    InvalidMetricsAddress(String),

    #[error("timeouts.request_secs must be greater than zero")]
    ZeroRequestTimeout,

    #[error("proxy.context must not be an empty list")]
    EmptyContext,

    #[error("proxy.path_rewrite pattern '{0}' is not a valid regex")]
    InvalidRewritePattern(String),

    #[error("proxy.router target '{target}' for '{key}' is not a valid URL")]
    InvalidRouterTarget { key: String, target: String },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    let proxy = &config.proxy;
    match &proxy.target {
        None => errors.push(ValidationError::MissingTarget),
        Some(target) if Url::parse(target).is_err() => {
            errors.push(ValidationError::InvalidTarget(target.clone()))
        }
        Some(_) => {}
    }

    if let Some(crate::config::schema::ContextConfig::Many(list)) = &proxy.context {
        if list.is_empty() {
            errors.push(ValidationError::EmptyContext);
        }
    }

    for rule in &proxy.path_rewrite {
        if Regex::new(&rule.pattern).is_err() {
            errors.push(ValidationError::InvalidRewritePattern(rule.pattern.clone()));
        }
    }

    for entry in &proxy.router {
        if Url::parse(&entry.target).is_err() {
            errors.push(ValidationError::InvalidRouterTarget {
                key: entry.key.clone(),
                target: entry.target.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
