use std::fmt;

use http::header::{CONNECTION, COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Version};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use url::Url;

pub const BODY_PRINT_LIMIT: usize = 10_000;

/// Specifies limitations on printing request bodies when logging requests. For some servers
/// the bodies may be too large to reasonably print and it may be desirable to limit them.
#[derive(Debug, Copy, Clone)]
pub enum BodyPrintLimit {
    /// Maximum length of a body to print in bytes.
    Limited(usize),
    /// There is no limit to the size of a body that may be printed.
    Unlimited,
}

/// An incoming request to an instance of [`MockServer`].
///
/// Request patterns get an immutable reference to a `Request` instance in
/// [`RequestPattern::matches`], and callbacks receive one to build their response.
///
/// [`MockServer`]: crate::MockServer
/// [`RequestPattern::matches`]: crate::matchers::RequestPattern::matches
///
/// ### Implementation notes:
/// The body of a `hyper` request is a stream that gets consumed when read.
/// We extract it once when the request arrives, store the result and pass an immutable
/// reference to the registry, the dispatcher and the request log.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub version: Version,
    pub body: Vec<u8>,
}

impl Request {
    /// Build a request by hand - e.g. to drive an [`ExpectationRegistry`] directly.
    ///
    /// [`ExpectationRegistry`]: crate::ExpectationRegistry
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            version: Version::HTTP_11,
            body: Vec::new(),
        }
    }

    /// Append a header. Panics if the name or the value are not valid header material.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = HeaderName::from_bytes(name.as_bytes()).expect("Invalid header name.");
        let value = HeaderValue::from_str(value).expect("Invalid header value.");
        self.headers.append(name, value);
        self
    }

    pub fn with_body<B: Into<Vec<u8>>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Whether the client asked to keep the connection open after this exchange.
    ///
    /// HTTP/1.1 connections are persistent unless `Connection: close` is sent,
    /// HTTP/1.0 ones only when `Connection: keep-alive` is sent.
    pub fn is_keep_alive(&self) -> bool {
        let has_token = |token: &str| {
            self.headers
                .get_all(CONNECTION)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(','))
                .any(|v| v.trim().eq_ignore_ascii_case(token))
        };
        match self.version {
            Version::HTTP_09 | Version::HTTP_10 => has_token("keep-alive"),
            _ => !has_token("close"),
        }
    }

    /// All cookies sent with the request, in order of appearance.
    pub fn cookies(&self) -> Vec<(String, String)> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }

    pub fn first_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub(crate) async fn from_hyper(
        request: hyper::Request<hyper::body::Incoming>,
    ) -> Result<Request, hyper::Error> {
        let (parts, body) = request.into_parts();
        let url = match parts.uri.authority() {
            Some(_) => parts.uri.to_string(),
            None => format!("http://localhost{}", parts.uri),
        };
        // An origin-form target always parses once prefixed, fall back to the root otherwise.
        let url = url
            .parse()
            .unwrap_or_else(|_| Url::parse("http://localhost/").expect("Valid fallback url"));

        let body = body.collect().await?.to_bytes();

        Ok(Self {
            url,
            method: parts.method,
            headers: parts.headers,
            version: parts.version,
            body: body.to_vec(),
        })
    }

    pub(crate) fn print_with_limit(
        &self,
        mut buffer: impl fmt::Write,
        body_print_limit: BodyPrintLimit,
    ) -> fmt::Result {
        writeln!(buffer, "{} {}", self.method, self.url)?;
        for name in self.headers.keys() {
            let values = self
                .headers
                .get_all(name)
                .iter()
                .map(|value| String::from_utf8_lossy(value.as_bytes()))
                .collect::<Vec<_>>();
            let values = values.join(",");
            writeln!(buffer, "{}: {}", name, values)?;
        }

        match body_print_limit {
            BodyPrintLimit::Limited(limit) if self.body.len() > limit => {
                let mut written = false;
                for end_byte in limit..(limit + 4).min(self.body.len()) {
                    if let Ok(truncated) = std::str::from_utf8(&self.body[..end_byte]) {
                        written = true;
                        writeln!(buffer, "{}", truncated)?;
                        writeln!(
                            buffer,
                            "We truncated the body because it was too large: {} bytes (limit: {} bytes)",
                            self.body.len(),
                            limit
                        )?;
                        writeln!(
                            buffer,
                            "Increase this limit by setting `STANDIN_BODY_PRINT_LIMIT`, or calling `MockServerBuilder::body_print_limit` when building your MockServer instance"
                        )?;
                        break;
                    }
                }
                if !written {
                    writeln!(
                        buffer,
                        "Body is likely binary (invalid utf-8) size is {} bytes",
                        self.body.len()
                    )
                } else {
                    Ok(())
                }
            }
            _ => {
                if let Ok(body) = std::str::from_utf8(&self.body) {
                    writeln!(buffer, "{}", body)
                } else {
                    writeln!(
                        buffer,
                        "Body is likely binary (invalid utf-8) size is {} bytes",
                        self.body.len()
                    )
                }
            }
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.print_with_limit(f, BodyPrintLimit::Limited(BODY_PRINT_LIMIT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str) -> Request {
        Request::new(
            Method::GET,
            Url::parse(&format!("http://localhost{}", path)).unwrap(),
        )
    }

    #[test]
    fn http_11_is_keep_alive_unless_close_is_requested() {
        assert!(get("/").is_keep_alive());
        assert!(!get("/").with_header("connection", "close").is_keep_alive());
        assert!(!get("/")
            .with_header("connection", "upgrade, Close")
            .is_keep_alive());
    }

    #[test]
    fn http_10_is_keep_alive_only_when_asked() {
        let request = get("/").with_version(Version::HTTP_10);
        assert!(!request.is_keep_alive());
        assert!(request
            .with_header("connection", "keep-alive")
            .is_keep_alive());
    }

    #[test]
    fn cookies_are_split_across_headers() {
        let request = get("/")
            .with_header("cookie", "a=1; b=2")
            .with_header("cookie", "c=3");
        assert_eq!(
            request.cookies(),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
                ("c".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn large_bodies_are_truncated_when_printed() {
        let request = get("/").with_body("a".repeat(20));
        let mut printed = String::new();
        request
            .print_with_limit(&mut printed, BodyPrintLimit::Limited(5))
            .unwrap();
        assert!(printed.contains("aaaaa\n"));
        assert!(printed.contains("We truncated the body"));
    }
}
