//! Shell-glob matching for request paths.
//!
//! Globs are translated to anchored regular expressions once, when the
//! context matcher is built.
//!
//! # Syntax
//! - `*` matches any run of characters except `/`
//! - `**` as a whole segment matches zero or more segments; anywhere else it
//!   matches any run of characters, `/` included
//! - `?` matches one character except `/`
//! - `[abc]`, `[a-z]`, `[!abc]` character classes
//! - `{a,b}` alternation (nestable)
//! - `(a|b)` and `@(a|b)` extglob alternation
//! - a leading `!` turns the pattern into an exclusion
//!
//! A path matches a set when it matches at least one inclusion (or the set
//! holds only exclusions) and none of the exclusions.

use regex::Regex;

use crate::error::ConfigError;

/// Returns true if the string uses glob syntax.
///
/// Parentheses only count when they hold an alternation, so `/api(v1)`
/// stays a literal prefix.
pub fn is_glob(pattern: &str) -> bool {
    pattern.starts_with('!')
        || pattern.contains(['*', '?', '[', '{'])
        || has_paren_alternation(pattern)
}

fn has_paren_alternation(pattern: &str) -> bool {
    let chars: Vec<char> = pattern.chars().collect();
    (0..chars.len()).any(|i| chars[i] == '(' && opens_group(&chars, i))
}

/// A compiled set of inclusion and exclusion globs.
#[derive(Debug, Clone)]
pub struct GlobSet {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl GlobSet {
    /// Compile every pattern of the set.
    pub fn new<I, S>(patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut include = Vec::new();
        let mut exclude = Vec::new();

        for pattern in patterns {
            let pattern = pattern.as_ref();
            let (negated, body) = match pattern.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, pattern),
            };

            let source = translate(body).map_err(|message| ConfigError::InvalidGlob {
                pattern: pattern.to_string(),
                message,
            })?;
            let regex = Regex::new(&source).map_err(|e| ConfigError::InvalidGlob {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;

            if negated {
                exclude.push(regex);
            } else {
                include.push(regex);
            }
        }

        Ok(Self { include, exclude })
    }

    /// Test a path against the set.
    pub fn is_match(&self, path: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|r| r.is_match(path));
        included && !self.exclude.iter().any(|r| r.is_match(path))
    }
}

/// Translate one glob (without its `!` prefix) into regex source.
fn translate(glob: &str) -> Result<String, String> {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');

    let mut brace_depth = 0usize;
    // true for `(` that opens an alternation group
    let mut parens: Vec<bool> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' => {
                let mut end = i + 1;
                while end < chars.len() && chars[end] == '*' {
                    end += 1;
                }

                if end - i == 1 {
                    out.push_str("[^/]*");
                    i = end;
                    continue;
                }

                let segment_start = i == 0 || chars[i - 1] == '/';
                let segment_end = end == chars.len() || chars[end] == '/';

                if segment_start && segment_end && end < chars.len() {
                    // `**/` swallows zero or more whole segments
                    out.push_str("(?:[^/]*/)*");
                    i = end + 1;
                } else if segment_start && segment_end && i > 0 {
                    // trailing `/**` also matches the bare parent
                    out.pop();
                    out.push_str("(?:/.*)?");
                    i = end;
                } else {
                    out.push_str(".*");
                    i = end;
                }
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '[' => match class_end(&chars, i) {
                Some(close) => {
                    out.push('[');
                    let mut j = i + 1;
                    if matches!(chars[j], '!' | '^') {
                        out.push('^');
                        j += 1;
                    }
                    while j < close {
                        let ch = chars[j];
                        if matches!(ch, '[' | '&' | '~' | '\\') {
                            out.push('\\');
                        }
                        out.push(ch);
                        j += 1;
                    }
                    out.push(']');
                    i = close + 1;
                }
                None => {
                    out.push_str(r"\[");
                    i += 1;
                }
            },
            '{' => {
                brace_depth += 1;
                out.push_str("(?:");
                i += 1;
            }
            '}' if brace_depth > 0 => {
                brace_depth -= 1;
                out.push(')');
                i += 1;
            }
            ',' if brace_depth > 0 => {
                out.push('|');
                i += 1;
            }
            '@' if chars.get(i + 1) == Some(&'(') && opens_group(&chars, i + 1) => {
                i += 1;
            }
            '(' => {
                let group = opens_group(&chars, i);
                out.push_str(if group { "(?:" } else { r"\(" });
                parens.push(group);
                i += 1;
            }
            ')' => {
                out.push_str(if parens.pop() == Some(true) { ")" } else { r"\)" });
                i += 1;
            }
            '|' if parens.contains(&true) => {
                out.push('|');
                i += 1;
            }
            '\\' if i + 1 < chars.len() => {
                out.push_str(&regex::escape(&chars[i + 1].to_string()));
                i += 2;
            }
            other => {
                out.push_str(&regex::escape(&other.to_string()));
                i += 1;
            }
        }
    }

    if brace_depth > 0 {
        return Err("unclosed '{'".to_string());
    }

    out.push('$');
    Ok(out)
}

/// True when the `(` at `open` encloses a `|` before its `)`.
fn opens_group(chars: &[char], open: usize) -> bool {
    let rest = &chars[open + 1..];
    rest.iter()
        .position(|&c| c == ')')
        .is_some_and(|close| rest[..close].contains(&'|'))
}

/// Index of the `]` closing the class opened at `open`, if any.
fn class_end(chars: &[char], open: usize) -> Option<usize> {
    let mut j = open + 1;
    if j < chars.len() && matches!(chars[j], '!' | '^') {
        j += 1;
    }
    // a leading `]` is literal
    if j < chars.len() && chars[j] == ']' {
        j += 1;
    }
    while j < chars.len() {
        if chars[j] == ']' {
            return Some(j);
        }
        j += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(patterns: &[&str]) -> GlobSet {
        GlobSet::new(patterns).unwrap()
    }

    #[test]
    fn test_is_glob() {
        assert!(is_glob("/api/**"));
        assert!(is_glob("**/*.json"));
        assert!(is_glob("!/api/private"));
        assert!(is_glob("/file?.txt"));
        assert!(is_glob("/{api,ajax}"));
        assert!(!is_glob("/api"));
        assert!(!is_glob("/api/users/"));
        assert!(is_glob("/(api|rest)/users"));
        assert!(!is_glob("/api(v1)"));
        assert!(!is_glob("/a(b)|c"));
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        let globs = set(&["/api/*.json"]);
        assert!(globs.is_match("/api/users.json"));
        assert!(!globs.is_match("/api/v1/users.json"));
        assert!(!globs.is_match("/api/users.xml"));
    }

    #[test]
    fn test_globstar() {
        let globs = set(&["/api/**"]);
        assert!(globs.is_match("/api"));
        assert!(globs.is_match("/api/"));
        assert!(globs.is_match("/api/users/42"));
        assert!(!globs.is_match("/apis"));
        assert!(!globs.is_match("/other/api"));

        let globs = set(&["**/*.html"]);
        assert!(globs.is_match("/index.html"));
        assert!(globs.is_match("/docs/guide/index.html"));
        assert!(!globs.is_match("/docs/guide/index.htm"));

        let globs = set(&["/api/**/users"]);
        assert!(globs.is_match("/api/users"));
        assert!(globs.is_match("/api/v1/eu/users"));
    }

    #[test]
    fn test_question_mark_class_and_braces() {
        assert!(set(&["/file?.txt"]).is_match("/file1.txt"));
        assert!(!set(&["/file?.txt"]).is_match("/file/.txt"));

        let class = set(&["/v[12]/*"]);
        assert!(class.is_match("/v1/a"));
        assert!(!class.is_match("/v3/a"));

        let negated_class = set(&["/v[!12]/*"]);
        assert!(negated_class.is_match("/v3/a"));
        assert!(!negated_class.is_match("/v1/a"));

        let braces = set(&["/{api,ajax}/**"]);
        assert!(braces.is_match("/api/x"));
        assert!(braces.is_match("/ajax/y"));
        assert!(!braces.is_match("/rpc/z"));
    }

    #[test]
    fn test_negation() {
        let globs = set(&["/api/**", "!**/*.html"]);
        assert!(globs.is_match("/api/data.json"));
        assert!(!globs.is_match("/api/page.html"));
        assert!(!globs.is_match("/static/app.js"));

        let only_exclusions = set(&["!/private/**"]);
        assert!(only_exclusions.is_match("/public/file"));
        assert!(!only_exclusions.is_match("/private/file"));
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        let globs = set(&["/api/v1.0/*"]);
        assert!(globs.is_match("/api/v1.0/x"));
        assert!(!globs.is_match("/api/v1x0/x"));
    }

    #[test]
    fn test_extglob_alternation() {
        let globs = set(&["/(api|rest)/**"]);
        assert!(globs.is_match("/api/users"));
        assert!(globs.is_match("/rest/orders/1"));
        assert!(!globs.is_match("/web/index"));

        let globs = set(&["/@(v1|v2)/*"]);
        assert!(globs.is_match("/v2/users"));
        assert!(!globs.is_match("/v3/users"));
    }

    #[test]
    fn test_parentheses_without_alternation_stay_literal() {
        let globs = set(&["/api(v1)/*"]);
        assert!(globs.is_match("/api(v1)/users"));
        assert!(!globs.is_match("/apiv1/users"));
    }

    #[test]
    fn test_unclosed_paren_is_literal() {
        let globs = set(&["/(api|rest/*"]);
        assert!(globs.is_match("/(api|rest/x"));
        assert!(!globs.is_match("/api/x"));
    }

    #[test]
    fn test_unclosed_brace_is_rejected() {
        let err = GlobSet::new(["/{api,ajax"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGlob { .. }));
    }
}
