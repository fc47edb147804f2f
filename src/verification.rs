use crate::matchers::RequestPattern;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The accepted range of matching requests for a [`Verification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationTimes {
    #[serde(default)]
    pub at_least: u64,
    /// `None` means there is no upper bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_most: Option<u64>,
}

impl Default for VerificationTimes {
    fn default() -> Self {
        Self::at_least(1)
    }
}

impl VerificationTimes {
    pub fn exactly(n: u64) -> Self {
        Self {
            at_least: n,
            at_most: Some(n),
        }
    }

    pub fn once() -> Self {
        Self::exactly(1)
    }

    pub fn at_least(n: u64) -> Self {
        Self {
            at_least: n,
            at_most: None,
        }
    }

    pub fn at_most(n: u64) -> Self {
        Self {
            at_least: 0,
            at_most: Some(n),
        }
    }

    pub fn between(at_least: u64, at_most: u64) -> Self {
        Self {
            at_least,
            at_most: Some(at_most),
        }
    }

    pub fn contains(&self, n: u64) -> bool {
        n >= self.at_least && self.at_most.map_or(true, |at_most| n <= at_most)
    }
}

impl fmt::Display for VerificationTimes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let times = |n: u64| if n == 1 { "once".to_string() } else { format!("{} times", n) };
        match (self.at_least, self.at_most) {
            (at_least, Some(at_most)) if at_least == at_most => {
                write!(f, "exactly {}", times(at_least))
            }
            (0, Some(at_most)) => write!(f, "at most {}", times(at_most)),
            (at_least, None) => write!(f, "at least {}", times(at_least)),
            (at_least, Some(at_most)) => write!(f, "between {} and {} times", at_least, at_most),
        }
    }
}

/// Check how many recorded requests matched a pattern.
///
/// ```rust
/// use standin::{MockServer, Verification, VerificationTimes};
/// use standin::matchers::request;
///
/// #[async_std::main]
/// async fn main() {
///     let mock_server = MockServer::start().await;
///
///     reqwest::get(format!("{}/hello", mock_server.uri())).await.unwrap();
///
///     let verification = Verification::new(request().path("/hello"))
///         .times(VerificationTimes::once());
///     assert!(mock_server.verify(&verification).is_ok());
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    #[serde(default)]
    pub http_request: RequestPattern,
    #[serde(default)]
    pub times: VerificationTimes,
}

impl Verification {
    pub fn new(http_request: RequestPattern) -> Self {
        Self {
            http_request,
            times: VerificationTimes::default(),
        }
    }

    pub fn times(mut self, times: VerificationTimes) -> Self {
        self.times = times;
        self
    }
}

/// Check that requests matching each pattern were received in this order.
///
/// Other requests may have been received in between.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSequence {
    #[serde(default)]
    pub http_requests: Vec<RequestPattern>,
}

impl VerificationSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, pattern: RequestPattern) -> Self {
        self.http_requests.push(pattern);
        self
    }
}

/// Why a verification failed, in a human-readable form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct VerificationFailure(pub(crate) String);

impl VerificationFailure {
    pub fn message(&self) -> &str {
        &self.0
    }
}
