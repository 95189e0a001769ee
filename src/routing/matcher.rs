//! Context matching: decides whether a request is in scope for the proxy.
//!
//! # Responsibilities
//! - Classify raw context patterns (literal prefix vs glob) once
//! - Extract the path component of the request URI (query and fragment
//!   are ignored)
//! - Evaluate the context against that path
//!
//! # Design Decisions
//! - Path matching is case-sensitive, no trailing-slash normalization
//! - Lists must be homogeneous: all literal or all glob
//! - Shape errors surface when the matcher is built, never at match time

use std::fmt;
use std::sync::Arc;

use axum::http::request::Parts;

use crate::error::ConfigError;
use crate::routing::glob::{is_glob, GlobSet};

/// Custom scope predicate, given the request pathname and head.
pub type ContextPredicate = Arc<dyn Fn(&str, &Parts) -> bool + Send + Sync>;

/// The scope rule of a middleware instance.
#[derive(Clone)]
pub enum MatchContext {
    StringPrefix(String),
    GlobPattern(String),
    PrefixList(Vec<String>),
    GlobList(Vec<String>),
    Predicate(ContextPredicate),
}

impl MatchContext {
    /// Classify a single pattern.
    pub fn from_pattern(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        if is_glob(&pattern) {
            MatchContext::GlobPattern(pattern)
        } else {
            MatchContext::StringPrefix(pattern)
        }
    }

    /// Classify a list of patterns. Mixed lists are rejected.
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        if patterns.is_empty() {
            return Err(ConfigError::InvalidContext);
        }

        if patterns.iter().all(|p| !is_glob(p)) {
            Ok(MatchContext::PrefixList(patterns))
        } else if patterns.iter().all(|p| is_glob(p)) {
            Ok(MatchContext::GlobList(patterns))
        } else {
            Err(ConfigError::InvalidContextArray)
        }
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str, &Parts) -> bool + Send + Sync + 'static,
    {
        MatchContext::Predicate(Arc::new(f))
    }
}

impl Default for MatchContext {
    fn default() -> Self {
        MatchContext::StringPrefix("/".to_string())
    }
}

impl fmt::Debug for MatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchContext::StringPrefix(p) => f.debug_tuple("StringPrefix").field(p).finish(),
            MatchContext::GlobPattern(p) => f.debug_tuple("GlobPattern").field(p).finish(),
            MatchContext::PrefixList(l) => f.debug_tuple("PrefixList").field(l).finish(),
            MatchContext::GlobList(l) => f.debug_tuple("GlobList").field(l).finish(),
            MatchContext::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Compiled form of a `MatchContext`.
#[derive(Clone)]
enum Compiled {
    Prefixes(Vec<String>),
    Globs(GlobSet),
    Predicate(ContextPredicate),
}

/// Decides whether a request path is in scope.
#[derive(Clone)]
pub struct ContextMatcher {
    compiled: Compiled,
}

impl ContextMatcher {
    /// Build the matcher, compiling globs up front.
    pub fn new(context: MatchContext) -> Result<Self, ConfigError> {
        let compiled = match context {
            MatchContext::StringPrefix(prefix) => Compiled::Prefixes(vec![prefix]),
            MatchContext::PrefixList(prefixes) => {
                if prefixes.is_empty() {
                    return Err(ConfigError::InvalidContext);
                }
                if prefixes.iter().any(|p| is_glob(p)) {
                    return Err(ConfigError::InvalidContextArray);
                }
                Compiled::Prefixes(prefixes)
            }
            MatchContext::GlobPattern(pattern) => Compiled::Globs(GlobSet::new([pattern])?),
            MatchContext::GlobList(patterns) => {
                if patterns.is_empty() {
                    return Err(ConfigError::InvalidContext);
                }
                if patterns.iter().any(|p| !is_glob(p)) {
                    return Err(ConfigError::InvalidContextArray);
                }
                Compiled::Globs(GlobSet::new(&patterns)?)
            }
            MatchContext::Predicate(f) => Compiled::Predicate(f),
        };

        Ok(Self { compiled })
    }

    /// Returns true if the request is in scope.
    ///
    /// `uri` is the full request URI (origin or absolute form); only its
    /// path component takes part in the decision.
    pub fn matches(&self, uri: &str, request: &Parts) -> bool {
        let pathname = url_pathname(uri);
        match &self.compiled {
            Compiled::Prefixes(prefixes) => prefixes.iter().any(|p| pathname.starts_with(p.as_str())),
            Compiled::Globs(globs) => globs.is_match(pathname),
            Compiled::Predicate(f) => f(pathname, request),
        }
    }
}

impl fmt::Debug for ContextMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.compiled {
            Compiled::Prefixes(p) => format!("Prefixes({:?})", p),
            Compiled::Globs(_) => "Globs".to_string(),
            Compiled::Predicate(_) => "Predicate".to_string(),
        };
        f.debug_struct("ContextMatcher").field("compiled", &kind).finish()
    }
}

/// RFC 3986 path of a request URI.
///
/// `/api/b?x=1#top` -> `/api/b`, `http://example.org/api/b` -> `/api/b`.
/// Only a leading scheme marks the absolute form; `://` further into an
/// origin-form path is part of the path.
pub fn url_pathname(uri: &str) -> &str {
    let end = uri.find(['?', '#']).unwrap_or(uri.len());
    let uri = &uri[..end];

    match scheme_len(uri) {
        Some(scheme_end) => {
            let rest = &uri[scheme_end + 3..];
            match rest.find('/') {
                Some(path_start) => &rest[path_start..],
                None => "/",
            }
        }
        None => uri,
    }
}

/// Length of a leading `scheme` followed by `://`.
fn scheme_len(uri: &str) -> Option<usize> {
    let end = uri.find("://")?;
    let scheme = &uri[..end];
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    fn parts(uri: &str) -> Parts {
        Request::builder()
            .uri(uri)
            .header("host", "localhost:3000")
            .body(Body::empty())
            .unwrap()
            .into_parts()
            .0
    }

    fn matches(context: MatchContext, uri: &str) -> bool {
        ContextMatcher::new(context).unwrap().matches(uri, &parts(uri))
    }

    #[test]
    fn test_url_pathname() {
        assert_eq!(url_pathname("/api/b/c?x=1"), "/api/b/c");
        assert_eq!(url_pathname("/api#frag"), "/api");
        assert_eq!(url_pathname("http://example.org/api/b/c/d.html"), "/api/b/c/d.html");
        assert_eq!(url_pathname("http://example.org"), "/");
        assert_eq!(url_pathname("http://example.org?q=/api"), "/");
        assert_eq!(url_pathname("ws+unix://host/socket"), "/socket");
    }

    #[test]
    fn test_scheme_inside_path_is_not_absolute_form() {
        assert_eq!(
            url_pathname("/redirect/http://evil.example/x"),
            "/redirect/http://evil.example/x"
        );
        assert!(matches(
            MatchContext::from_pattern("/redirect"),
            "/redirect/http://evil.example/x"
        ));
        assert!(!matches(
            MatchContext::from_pattern("/x"),
            "/redirect/http://evil.example/x"
        ));
    }

    #[test]
    fn test_literal_parentheses_prefix() {
        let ctx = MatchContext::from_pattern("/api(v1)");
        assert!(matches!(ctx, MatchContext::StringPrefix(_)));
        assert!(matches(ctx, "/api(v1)/users"));
    }

    #[test]
    fn test_extglob_context() {
        let ctx = MatchContext::from_pattern("/(api|rest)/**");
        assert!(matches!(ctx, MatchContext::GlobPattern(_)));
        assert!(matches(ctx.clone(), "/api/users"));
        assert!(!matches(ctx, "/web/users"));
    }

    #[test]
    fn test_string_prefix() {
        let ctx = MatchContext::from_pattern("/api");
        assert!(matches!(ctx, MatchContext::StringPrefix(_)));
        assert!(matches(ctx.clone(), "/api/users"));
        assert!(matches(ctx.clone(), "/api"));
        assert!(matches(ctx.clone(), "/apis"));
        assert!(!matches(ctx.clone(), "/other"));
        assert!(!matches(ctx.clone(), "/API/users"));
        assert!(!matches(ctx, "/v1/api"));
    }

    #[test]
    fn test_prefix_ignores_query_and_fragment() {
        let ctx = MatchContext::from_pattern("/api");
        assert!(!matches(ctx.clone(), "/other?next=/api"));
        assert!(matches(ctx, "http://example.org/api/b?x=1#f"));
    }

    #[test]
    fn test_default_context_matches_everything() {
        assert!(matches(MatchContext::default(), "/"));
        assert!(matches(MatchContext::default(), "/anything/at/all"));
    }

    #[test]
    fn test_prefix_list() {
        let ctx = MatchContext::from_patterns(["/api", "/ajax"]).unwrap();
        assert!(matches!(ctx, MatchContext::PrefixList(_)));
        assert!(matches(ctx.clone(), "/api/a"));
        assert!(matches(ctx.clone(), "/ajax/b"));
        assert!(!matches(ctx, "/rest/c"));
    }

    #[test]
    fn test_glob_context() {
        let ctx = MatchContext::from_pattern("/api/**/*.json");
        assert!(matches!(ctx, MatchContext::GlobPattern(_)));
        assert!(matches(ctx.clone(), "/api/v1/users.json?page=2"));
        assert!(!matches(ctx, "/api/v1/users.xml"));
    }

    #[test]
    fn test_glob_list_with_negation() {
        let ctx = MatchContext::from_patterns(["/api/**", "!**/*.html"]).unwrap();
        assert!(matches!(ctx, MatchContext::GlobList(_)));
        assert!(matches(ctx.clone(), "/api/data"));
        assert!(!matches(ctx, "/api/index.html"));
    }

    #[test]
    fn test_mixed_list_is_rejected() {
        let err = MatchContext::from_patterns(["/api", "/ajax/**"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidContextArray));

        let err = ContextMatcher::new(MatchContext::PrefixList(vec!["/api".into(), "**".into()]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidContextArray));
    }

    #[test]
    fn test_empty_list_is_rejected() {
        let err = MatchContext::from_patterns(Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidContext));
    }

    #[test]
    fn test_predicate_receives_pathname_and_request() {
        let ctx = MatchContext::predicate(|pathname, req| {
            pathname == "/custom" && req.headers.get("host").is_some()
        });
        assert!(matches(ctx.clone(), "/custom?x=1"));
        assert!(!matches(ctx, "/custom/deeper"));
    }
}
