//! Request patterns and the matching strategies they are built from.
//!
//! A [`RequestPattern`] is plain data: it can be registered programmatically, sent as JSON to
//! the control plane, exported back and compared with other patterns.
//!
//! It offers two capabilities:
//! - [`RequestPattern::matches`] decides whether an incoming [`Request`] satisfies the pattern;
//! - [`RequestPattern::contains`] decides whether every request matched by another pattern is
//!   also matched by this one. The registry relies on it to detect overlapping expectations and
//!   to clear expectations with a partial pattern.
//!
//! Unconstrained fields behave as wildcards.
use crate::Request;
use assert_json_diff::{assert_json_matches_no_panic, CompareMode};
use log::debug;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};

/// A constraint on a single string value.
///
/// A candidate satisfies it if it is equal to the configured value or if it is fully matched
/// by the configured value interpreted as a regular expression.
/// The regular expression is compiled lazily, the first time it is needed.
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct StringMatcher {
    value: String,
    regex: OnceCell<Option<Regex>>,
}

impl StringMatcher {
    pub fn new<T: Into<String>>(value: T) -> Self {
        Self {
            value: value.into(),
            regex: OnceCell::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    fn regex(&self) -> Option<&Regex> {
        self.regex
            .get_or_init(|| match Regex::new(&format!("^(?:{})$", self.value)) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    debug!("`{}` is not a valid regex, using exact matching: {}", self.value, e);
                    None
                }
            })
            .as_ref()
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.value == candidate || self.regex().is_some_and(|r| r.is_match(candidate))
    }

    /// `other`'s value is treated as a literal: a regex on the other side is only contained
    /// if it is textually identical or if it is itself matched as a string.
    pub fn contains(&self, other: &StringMatcher) -> bool {
        self.matches(&other.value)
    }
}

impl PartialEq for StringMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for StringMatcher {}

impl Debug for StringMatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.value)
    }
}

impl From<String> for StringMatcher {
    fn from(value: String) -> Self {
        StringMatcher::new(value)
    }
}

impl From<&str> for StringMatcher {
    fn from(value: &str) -> Self {
        StringMatcher::new(value)
    }
}

impl From<StringMatcher> for String {
    fn from(matcher: StringMatcher) -> Self {
        matcher.value
    }
}

/// How a JSON body is compared against the expected document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JsonMatchType {
    /// The request body must be the same JSON document.
    Strict,
    /// The request body must contain at least the expected fields, extra fields are ignored.
    #[default]
    OnlyMatchingFields,
}

/// A constraint on the request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BodyMatcher {
    String {
        string: String,
        #[serde(default, rename = "subString", skip_serializing_if = "std::ops::Not::not")]
        sub_string: bool,
    },
    Regex {
        regex: StringMatcher,
    },
    Json {
        json: Value,
        #[serde(default, rename = "matchType")]
        match_type: JsonMatchType,
    },
    Binary {
        #[serde(rename = "base64Bytes", with = "crate::serialization::base64_bytes")]
        bytes: Vec<u8>,
    },
}

impl BodyMatcher {
    pub fn matches(&self, body: &[u8]) -> bool {
        match self {
            BodyMatcher::String { string, sub_string } => match std::str::from_utf8(body) {
                Ok(body) if *sub_string => body.contains(string.as_str()),
                Ok(body) => body == string,
                Err(err) => {
                    debug!("can't convert body from byte slice to string: {}", err);
                    false
                }
            },
            BodyMatcher::Regex { regex } => std::str::from_utf8(body)
                .map(|body| regex.matches(body))
                .unwrap_or(false),
            BodyMatcher::Json { json, match_type } => {
                let Ok(body) = serde_json::from_slice::<Value>(body) else {
                    return false;
                };
                match match_type {
                    JsonMatchType::Strict => body == *json,
                    JsonMatchType::OnlyMatchingFields => {
                        let config = assert_json_diff::Config::new(CompareMode::Inclusive);
                        assert_json_matches_no_panic(&body, json, config).is_ok()
                    }
                }
            }
            BodyMatcher::Binary { bytes } => body == bytes.as_slice(),
        }
    }

    pub fn contains(&self, other: &BodyMatcher) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (
                BodyMatcher::String {
                    string,
                    sub_string: true,
                },
                BodyMatcher::String { string: other, .. },
            ) => other.contains(string.as_str()),
            (
                BodyMatcher::Regex { regex },
                BodyMatcher::String {
                    string,
                    sub_string: false,
                },
            ) => regex.matches(string),
            (
                BodyMatcher::Json {
                    json,
                    match_type: JsonMatchType::OnlyMatchingFields,
                },
                BodyMatcher::Json { json: other, .. },
            ) => {
                let config = assert_json_diff::Config::new(CompareMode::Inclusive);
                assert_json_matches_no_panic(other, json, config).is_ok()
            }
            (BodyMatcher::String { .. } | BodyMatcher::Regex { .. }, BodyMatcher::Binary { bytes }) => {
                self.matches(bytes)
            }
            _ => false,
        }
    }
}

/// Match a body exactly against the given string.
pub fn body_string<T: Into<String>>(body: T) -> BodyMatcher {
    BodyMatcher::String {
        string: body.into(),
        sub_string: false,
    }
}

/// Match bodies containing the given string.
pub fn body_string_contains<T: Into<String>>(body: T) -> BodyMatcher {
    BodyMatcher::String {
        string: body.into(),
        sub_string: true,
    }
}

pub fn body_regex<T: Into<String>>(regex: T) -> BodyMatcher {
    BodyMatcher::Regex {
        regex: StringMatcher::new(regex),
    }
}

pub fn body_bytes<T: Into<Vec<u8>>>(body: T) -> BodyMatcher {
    BodyMatcher::Binary { bytes: body.into() }
}

/// Match a body that is the same JSON document as `body`.
pub fn body_json<T: Serialize>(body: T) -> BodyMatcher {
    BodyMatcher::Json {
        json: serde_json::to_value(body).expect("Failed to serialize JSON body"),
        match_type: JsonMatchType::Strict,
    }
}

/// Match a JSON body containing at least the fields of `body`.
pub fn body_partial_json<T: Serialize>(body: T) -> BodyMatcher {
    BodyMatcher::Json {
        json: serde_json::to_value(body).expect("Failed to serialize JSON body"),
        match_type: JsonMatchType::OnlyMatchingFields,
    }
}

/// The pattern an [`Expectation`] is matched against.
///
/// ```rust
/// use standin::matchers::{body_partial_json, request};
///
/// let pattern = request()
///     .method("POST")
///     .path("/orders")
///     .header("content-type", "application/json")
///     .body(body_partial_json(serde_json::json!({ "quantity": 1 })));
/// ```
///
/// [`Expectation`]: crate::Expectation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<StringMatcher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<StringMatcher>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query_string_parameters: BTreeMap<String, Vec<StringMatcher>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Vec<StringMatcher>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cookies: BTreeMap<String, StringMatcher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyMatcher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<bool>,
}

/// Shorthand for [`RequestPattern::new`].
pub fn request() -> RequestPattern {
    RequestPattern::new()
}

impl RequestPattern {
    /// A pattern matching every request.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method<T: AsRef<str>>(mut self, method: T) -> Self {
        self.method = Some(StringMatcher::new(method.as_ref().to_ascii_uppercase()));
        self
    }

    /// Panics if `path` contains a query string: use [`RequestPattern::query_param`] instead.
    pub fn path<T: Into<String>>(mut self, path: T) -> Self {
        let path = path.into();
        if path.contains('?') {
            panic!(
                "Can't match the path `{}` because it contains a `?`. You must use `RequestPattern::query_param` to match on query parameters (the part of the path after the `?`).",
                path
            );
        }
        // Prepend "/" to the path if missing.
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        self.path = Some(StringMatcher::new(path));
        self
    }

    pub fn query_param<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.query_string_parameters
            .entry(key.into())
            .or_default()
            .push(StringMatcher::new(value));
        self
    }

    pub fn header<K: AsRef<str>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers
            .entry(key.as_ref().to_ascii_lowercase())
            .or_default()
            .push(StringMatcher::new(value));
        self
    }

    pub fn cookie<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.cookies.insert(key.into(), StringMatcher::new(value));
        self
    }

    pub fn body(mut self, body: BodyMatcher) -> Self {
        self.body = Some(body);
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    /// Whether `request` satisfies every constraint of this pattern.
    pub fn matches(&self, request: &Request) -> bool {
        let method_matches = self
            .method
            .as_ref()
            .map_or(true, |m| m.matches(request.method.as_str()));
        let path_matches = self
            .path
            .as_ref()
            .map_or(true, |p| p.matches(request.url.path()));
        method_matches
            && path_matches
            && self.query_matches(request)
            && self.headers_match(request)
            && self.cookies_match(request)
            && self
                .body
                .as_ref()
                .map_or(true, |b| b.matches(&request.body))
            && self
                .keep_alive
                .map_or(true, |keep_alive| keep_alive == request.is_keep_alive())
    }

    fn query_matches(&self, request: &Request) -> bool {
        self.query_string_parameters.iter().all(|(key, expected)| {
            let actual: Vec<_> = request
                .url
                .query_pairs()
                .filter(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
                .collect();
            expected
                .iter()
                .all(|matcher| actual.iter().any(|value| matcher.matches(value)))
        })
    }

    fn headers_match(&self, request: &Request) -> bool {
        self.headers.iter().all(|(name, expected)| {
            let actual: Vec<&str> = request
                .headers
                .get_all(name.as_str())
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect();
            if actual.is_empty() {
                return false;
            }
            expected.iter().all(|matcher| {
                actual.iter().any(|value| {
                    matcher.matches(value) || value.split(',').any(|v| matcher.matches(v.trim()))
                })
            })
        })
    }

    fn cookies_match(&self, request: &Request) -> bool {
        if self.cookies.is_empty() {
            return true;
        }
        let cookies = request.cookies();
        self.cookies.iter().all(|(name, expected)| {
            cookies
                .iter()
                .any(|(n, value)| n == name && expected.matches(value))
        })
    }

    /// Whether every request matched by `other` is also matched by `self`.
    ///
    /// Each constraint of `self` must either be absent or be satisfied by the corresponding
    /// constraint of `other`.
    pub fn contains(&self, other: &RequestPattern) -> bool {
        fn optional<T>(this: &Option<T>, other: &Option<T>, f: impl Fn(&T, &T) -> bool) -> bool {
            match (this, other) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(this), Some(other)) => f(this, other),
            }
        }

        fn multi_valued(
            this: &BTreeMap<String, Vec<StringMatcher>>,
            other: &BTreeMap<String, Vec<StringMatcher>>,
            case_insensitive: bool,
        ) -> bool {
            this.iter().all(|(key, expected)| {
                let values = other
                    .iter()
                    .filter(|(k, _)| {
                        if case_insensitive {
                            k.eq_ignore_ascii_case(key)
                        } else {
                            *k == key
                        }
                    })
                    .flat_map(|(_, v)| v.iter())
                    .collect::<Vec<_>>();
                expected
                    .iter()
                    .all(|matcher| values.iter().any(|value| matcher.contains(value)))
            })
        }

        optional(&self.method, &other.method, StringMatcher::contains)
            && optional(&self.path, &other.path, StringMatcher::contains)
            && multi_valued(
                &self.query_string_parameters,
                &other.query_string_parameters,
                false,
            )
            && multi_valued(&self.headers, &other.headers, true)
            && self.cookies.iter().all(|(name, expected)| {
                other
                    .cookies
                    .get(name)
                    .is_some_and(|value| expected.contains(value))
            })
            && optional(&self.body, &other.body, BodyMatcher::contains)
            && optional(&self.keep_alive, &other.keep_alive, |a, b| a == b)
    }
}
