//! Path rewriting.
//!
//! Rules are compiled once when the rewriter is created and applied in
//! declaration order. The first rule whose pattern matches the path wins and
//! rewriting stops there.

use std::fmt;
use std::sync::Arc;

use axum::http::request::Parts;
use regex::Regex;

use crate::error::ConfigError;

/// Custom rewrite function. Returning `None` means "no rewrite performed".
pub type RewriteFn = Arc<dyn Fn(&str, &Parts) -> Option<String> + Send + Sync>;

/// Raw `pathRewrite` configuration.
#[derive(Clone)]
pub enum PathRewriteConfig {
    /// `(regex source, replacement)` pairs in declaration order.
    Rules(Vec<(String, String)>),
    Custom(RewriteFn),
}

impl PathRewriteConfig {
    pub fn rules<I, K, V>(rules: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        PathRewriteConfig::Rules(
            rules
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str, &Parts) -> Option<String> + Send + Sync + 'static,
    {
        PathRewriteConfig::Custom(Arc::new(f))
    }
}

impl fmt::Debug for PathRewriteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathRewriteConfig::Rules(rules) => f.debug_tuple("Rules").field(rules).finish(),
            PathRewriteConfig::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A compiled rewrite rule.
#[derive(Debug, Clone)]
pub struct RewriteRule {
    pub pattern: Regex,
    pub replacement: String,
}

/// Rewrites request paths before they are forwarded.
#[derive(Clone)]
pub enum PathRewriter {
    Rules(Arc<[RewriteRule]>),
    Custom(RewriteFn),
}

impl PathRewriter {
    /// Build a rewriter from its configuration.
    ///
    /// Returns `Ok(None)` when nothing is configured (absent or empty rule
    /// list); callers must then skip rewriting entirely.
    pub fn create(config: Option<PathRewriteConfig>) -> Result<Option<Self>, ConfigError> {
        match config {
            None => Ok(None),
            Some(PathRewriteConfig::Custom(f)) => Ok(Some(PathRewriter::Custom(f))),
            Some(PathRewriteConfig::Rules(rules)) if rules.is_empty() => Ok(None),
            Some(PathRewriteConfig::Rules(rules)) => {
                let compiled = rules
                    .into_iter()
                    .map(|(pattern, replacement)| {
                        let regex = Regex::new(&pattern).map_err(|e| {
                            ConfigError::InvalidRewriteRule {
                                pattern: pattern.clone(),
                                message: e.to_string(),
                            }
                        })?;
                        tracing::debug!(
                            pattern = %pattern,
                            replacement = %replacement,
                            "Proxy rewrite rule created"
                        );
                        Ok(RewriteRule {
                            pattern: regex,
                            replacement,
                        })
                    })
                    .collect::<Result<Vec<_>, ConfigError>>()?;
                Ok(Some(PathRewriter::Rules(compiled.into())))
            }
        }
    }

    /// Rewrite a path. Rule sets always return `Some`; unmatched paths come
    /// back unchanged.
    pub fn rewrite(&self, path: &str, request: &Parts) -> Option<String> {
        match self {
            PathRewriter::Custom(f) => f(path, request),
            PathRewriter::Rules(rules) => {
                let rewritten = rules
                    .iter()
                    .find(|rule| rule.pattern.is_match(path))
                    .map(|rule| rule.pattern.replace(path, rule.replacement.as_str()).into_owned());

                match rewritten {
                    Some(result) => {
                        tracing::debug!(from = %path, to = %result, "Rewriting path");
                        Some(result)
                    }
                    None => Some(path.to_string()),
                }
            }
        }
    }
}

impl fmt::Debug for PathRewriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathRewriter::Rules(rules) => f.debug_tuple("Rules").field(&rules.len()).finish(),
            PathRewriter::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    fn parts() -> Parts {
        Request::builder().uri("/").body(Body::empty()).unwrap().into_parts().0
    }

    fn rewriter(rules: &[(&str, &str)]) -> PathRewriter {
        PathRewriter::create(Some(PathRewriteConfig::rules(rules.iter().copied())))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_absent_config_yields_no_rewriter() {
        assert!(PathRewriter::create(None).unwrap().is_none());
        assert!(PathRewriter::create(Some(PathRewriteConfig::Rules(vec![])))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_rewrite_rule() {
        let r = rewriter(&[("^/api/old", "/api/new")]);
        assert_eq!(r.rewrite("/api/old/42", &parts()).unwrap(), "/api/new/42");
    }

    #[test]
    fn test_remove_and_add_base_path() {
        let remove = rewriter(&[("^/remove/api", "")]);
        assert_eq!(remove.rewrite("/remove/api/lists", &parts()).unwrap(), "/lists");

        let add = rewriter(&[("^/", "/basepath/")]);
        assert_eq!(add.rewrite("/lists", &parts()).unwrap(), "/basepath/lists");
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let r = rewriter(&[("^/api", "/v1"), ("^/v1", "/v2"), ("/api", "/never")]);
        assert_eq!(r.rewrite("/api/users", &parts()).unwrap(), "/v1/users");
    }

    #[test]
    fn test_only_first_occurrence_is_replaced() {
        let r = rewriter(&[("api", "rest")]);
        assert_eq!(r.rewrite("/api/api", &parts()).unwrap(), "/rest/api");
    }

    #[test]
    fn test_capture_groups() {
        let r = rewriter(&[(r"^/users/(\d+)", "/people/$1/profile")]);
        assert_eq!(r.rewrite("/users/7?full=1", &parts()).unwrap(), "/people/7/profile?full=1");
    }

    #[test]
    fn test_unmatched_path_is_unchanged() {
        let r = rewriter(&[("^/api/old", "/api/new")]);
        assert_eq!(r.rewrite("/static/app.js", &parts()).unwrap(), "/static/app.js");
    }

    #[test]
    fn test_custom_function() {
        let config = PathRewriteConfig::custom(|path, _req| {
            path.starts_with("/api").then(|| path.replacen("/api", "/base/api", 1))
        });
        let r = PathRewriter::create(Some(config)).unwrap().unwrap();
        assert_eq!(r.rewrite("/api/x", &parts()).unwrap(), "/base/api/x");
        assert!(r.rewrite("/other", &parts()).is_none());
    }

    #[test]
    fn test_invalid_regex_is_a_config_error() {
        let err = PathRewriter::create(Some(PathRewriteConfig::rules([("^/api(", "/x")])))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRewriteRule { .. }));
    }
}
