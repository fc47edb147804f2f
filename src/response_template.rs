use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Bytes;
use serde::{Deserialize, Serialize};
use std::convert::TryInto;
use std::time::Duration;

/// How the connection carrying a response should be handled.
///
/// Every option is optional: when unset, the behaviour is derived from the request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    /// Do not emit a `Connection` header at all (unless `keep_alive_override` is set).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppress_connection_header: Option<bool>,
    /// Force the `Connection` header to `keep-alive` (`true`) or `close` (`false`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive_override: Option<bool>,
    /// Force closing (`true`) or keeping (`false`) the socket once the response is written,
    /// regardless of the `Connection` header that was sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_socket: Option<bool>,
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_suppress_connection_header(mut self, suppress: bool) -> Self {
        self.suppress_connection_header = Some(suppress);
        self
    }

    pub fn with_keep_alive_override(mut self, keep_alive: bool) -> Self {
        self.keep_alive_override = Some(keep_alive);
        self
    }

    pub fn with_close_socket(mut self, close_socket: bool) -> Self {
        self.close_socket = Some(close_socket);
        self
    }
}

/// The blueprint for the response returned when an expectation responds.
#[derive(Clone, Debug)]
pub struct ResponseTemplate {
    mime: String,
    status_code: StatusCode,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    delay: Option<Duration>,
    connection_options: Option<ConnectionOptions>,
}

// Templates are mostly assembled by hand in test suites - failures are most likely
// temporary mistakes. Hence the fluent methods panic instead of returning `Result`s,
// accepting the widest possible set of inputs and performing the fallible conversion
// internally.
//
// Templates decoded from the control plane go through `crate::serialization`, which
// validates headers and status codes before calling in here.
impl ResponseTemplate {
    pub fn new<S>(s: S) -> Self
    where
        S: TryInto<StatusCode>,
        <S as TryInto<StatusCode>>::Error: std::fmt::Debug,
    {
        let status_code = s.try_into().expect("Failed to convert into status code.");
        Self {
            status_code,
            headers: HeaderMap::new(),
            mime: String::new(),
            body: None,
            delay: None,
            connection_options: None,
        }
    }

    pub fn append_header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        <K as TryInto<HeaderName>>::Error: std::fmt::Debug,
        V: TryInto<HeaderValue>,
        <V as TryInto<HeaderValue>>::Error: std::fmt::Debug,
    {
        let key = key.try_into().expect("Failed to convert into header name.");
        let value = value
            .try_into()
            .expect("Failed to convert into header value.");
        self.headers.append(key, value);
        self
    }

    pub fn insert_header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        <K as TryInto<HeaderName>>::Error: std::fmt::Debug,
        V: TryInto<HeaderValue>,
        <V as TryInto<HeaderValue>>::Error: std::fmt::Debug,
    {
        let key = key.try_into().expect("Failed to convert into header name.");
        let value = value
            .try_into()
            .expect("Failed to convert into header value.");
        self.headers.insert(key, value);
        self
    }

    /// Append every header of `headers`, keeping multi-valued ones.
    pub fn append_header_map(mut self, headers: HeaderMap) -> Self {
        let mut last_name = None;
        for (name, value) in headers {
            // `HeaderMap`'s owning iterator only yields the name for the first value of a header.
            if let Some(name) = name {
                last_name = Some(name);
            }
            if let Some(name) = &last_name {
                self.headers.append(name.clone(), value);
            }
        }
        self
    }

    pub fn set_body_bytes<B>(mut self, body: B) -> Self
    where
        B: TryInto<Vec<u8>>,
        <B as TryInto<Vec<u8>>>::Error: std::fmt::Debug,
    {
        let body = body.try_into().expect("Failed to convert into body.");
        self.body = Some(body);
        self
    }

    pub fn set_body_json<B: Serialize>(mut self, body: B) -> Self {
        let body = serde_json::to_vec(&body).expect("Failed to convert into body.");

        self.body = Some(body);
        self.mime = "application/json".to_string();
        self
    }

    pub fn set_body_string<T>(mut self, body: T) -> Self
    where
        T: TryInto<String>,
        <T as TryInto<String>>::Error: std::fmt::Debug,
    {
        let body = body.try_into().expect("Failed to convert into body.");

        self.body = Some(body.into_bytes());
        self.mime = "text/plain".to_string();
        self
    }

    pub fn set_body_raw<B>(mut self, body: B, mime: &str) -> Self
    where
        B: TryInto<Vec<u8>>,
        <B as TryInto<Vec<u8>>>::Error: std::fmt::Debug,
    {
        let body = body.try_into().expect("Failed to convert into body.");
        self.body = Some(body);
        self.mime = mime.to_string();
        self
    }

    /// The dispatcher waits for `delay` before handing the response over to the writer.
    /// Only the connection serving the request is held up.
    pub fn set_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);

        self
    }

    pub fn set_connection_options(mut self, options: ConnectionOptions) -> Self {
        self.connection_options = Some(options);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }

    pub fn connection_options(&self) -> Option<&ConnectionOptions> {
        self.connection_options.as_ref()
    }

    pub(crate) fn generate_response(&self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::from(self.body.clone().unwrap_or_default()));
        *response.status_mut() = self.status_code;

        let mut headers = self.headers.clone();
        // Set content-type, if needed
        if !self.mime.is_empty() {
            if let Ok(mime) = HeaderValue::from_str(&self.mime) {
                headers.insert(http::header::CONTENT_TYPE, mime);
            }
        }
        *response.headers_mut() = headers;
        response
    }
}
