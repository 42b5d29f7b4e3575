//! Route interception fixtures
//!
//! A [`MockTable`] is the set of fabricated responses one browser session
//! installs before navigating. Patterns use Playwright's URL glob dialect and
//! are compiled to an anchored regular expression once, in Rust. The same
//! expression source is handed to the driver script as a `RegExp`, so the
//! matcher used by tests and request classification is the one the browser
//! actually applies.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{VerifyError, VerifyResult};

/// A Playwright-style URL glob.
///
/// - `**` standing as a whole path segment (bounded by `/` or the ends of
///   the pattern) matches any number of segments; a trailing `/` is part of it
/// - any other run of `*` matches characters except `/`, so `records**` does
///   not reach into `records/ws1`
/// - `{a,b}` matches either alternative
/// - `\` escapes the following character
///
/// Everything else is literal, `?` included. The whole URL must match.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UrlGlob {
    source: String,
    regex: Regex,
}

impl UrlGlob {
    pub fn new(glob: impl Into<String>) -> VerifyResult<Self> {
        let source = glob.into();
        let pattern = glob_to_regex(&source)?;
        let regex = Regex::new(&pattern).map_err(|e| VerifyError::InvalidPattern {
            pattern: source.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { source, regex })
    }

    /// The glob as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Anchored regex source, valid both for `regex` and for JavaScript `RegExp`.
    pub fn regex_source(&self) -> &str {
        self.regex.as_str()
    }

    pub fn matches(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }
}

impl TryFrom<String> for UrlGlob {
    type Error = VerifyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UrlGlob> for String {
    fn from(glob: UrlGlob) -> Self {
        glob.source
    }
}

impl PartialEq for UrlGlob {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for UrlGlob {}

impl fmt::Debug for UrlGlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UrlGlob").field(&self.source).finish()
    }
}

impl fmt::Display for UrlGlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn glob_to_regex(glob: &str) -> VerifyResult<String> {
    let invalid = |reason: &str| VerifyError::InvalidPattern {
        pattern: glob.to_string(),
        reason: reason.to_string(),
    };

    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');

    let mut chars = glob.chars().peekable();
    let mut prev: Option<char> = None;
    let mut in_group = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => {
                    push_literal(&mut out, escaped);
                    prev = Some(escaped);
                    continue;
                }
                None => return Err(invalid("trailing escape")),
            },
            '*' => {
                let mut stars = 1;
                while chars.peek() == Some(&'*') {
                    chars.next();
                    stars += 1;
                }
                let after = chars.peek().copied();
                let deep = stars > 1
                    && matches!(prev, None | Some('/'))
                    && matches!(after, None | Some('/'));
                if deep {
                    out.push_str("(?:[^/]*(?:/|$))*");
                    // The separator is absorbed by the segment group
                    if after == Some('/') {
                        chars.next();
                    }
                    prev = Some('/');
                } else {
                    out.push_str("[^/]*");
                    prev = Some('*');
                }
                continue;
            }
            '{' if !in_group => {
                in_group = true;
                out.push_str("(?:");
            }
            '{' => return Err(invalid("nested alternation")),
            '}' if in_group => {
                in_group = false;
                out.push(')');
            }
            ',' if in_group => out.push('|'),
            other => push_literal(&mut out, other),
        }
        prev = Some(c);
    }

    if in_group {
        return Err(invalid("unclosed alternation"));
    }

    out.push('$');
    Ok(out)
}

// Only characters both regex dialects treat as metacharacters are escaped.
fn push_literal(out: &mut String, c: char) {
    if matches!(
        c,
        '\\' | '^' | '$' | '.' | '|' | '?' | '*' | '+' | '(' | ')' | '[' | ']' | '{' | '}'
    ) {
        out.push('\\');
    }
    out.push(c);
}

fn default_status() -> u16 {
    200
}

fn default_content_type() -> String {
    "application/json".to_string()
}

/// One fabricated response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockRoute {
    pub pattern: UrlGlob,

    #[serde(default = "default_status")]
    pub status: u16,

    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// JSON body; `None` fulfills with an empty body
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

impl MockRoute {
    /// A 200 response carrying `body` as JSON.
    pub fn json(pattern: &str, body: serde_json::Value) -> VerifyResult<Self> {
        Ok(Self {
            pattern: UrlGlob::new(pattern)?,
            status: 200,
            content_type: default_content_type(),
            body: Some(body),
        })
    }

    /// An empty response with the given status.
    pub fn empty(pattern: &str, status: u16) -> VerifyResult<Self> {
        Ok(Self {
            pattern: UrlGlob::new(pattern)?,
            status,
            content_type: default_content_type(),
            body: None,
        })
    }

    /// Serialized response body as sent to the browser.
    pub fn body_text(&self) -> VerifyResult<String> {
        match &self.body {
            Some(body) => Ok(serde_json::to_string(body)?),
            None => Ok(String::new()),
        }
    }
}

/// Session-local set of mock routes, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MockTable {
    routes: Vec<MockRoute>,
}

impl MockTable {
    pub fn new(routes: Vec<MockRoute>) -> Self {
        Self { routes }
    }

    pub fn push(&mut self, route: MockRoute) {
        self.routes.push(route);
    }

    pub fn routes(&self) -> &[MockRoute] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Route that answers `url`, with its registration index.
    ///
    /// Playwright consults handlers in reverse registration order, so the last
    /// matching route wins.
    pub fn resolve(&self, url: &str) -> Option<(usize, &MockRoute)> {
        self.routes
            .iter()
            .enumerate()
            .rev()
            .find(|(_, route)| route.pattern.matches(url))
    }
}
