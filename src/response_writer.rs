use crate::response_template::ConnectionOptions;
use crate::{Request, ResponseTemplate};
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE, CONNECTION,
};
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Bytes;
use once_cell::sync::Lazy;

const CORS_ALLOWED_HEADERS: &str = "Allow, Content-Encoding, Content-Length, Content-Type, ETag, Expires, Last-Modified, Location, Server, Vary";

static CORS_HEADERS: Lazy<Vec<(HeaderName, HeaderValue)>> = Lazy::new(|| {
    vec![
        (ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")),
        (
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("CONNECT, DELETE, GET, HEAD, OPTIONS, POST, PUT, PATCH, TRACE"),
        ),
        (
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOWED_HEADERS),
        ),
        (
            ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(CORS_ALLOWED_HEADERS),
        ),
        (ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("300")),
    ]
});

/// When CORS headers are added to responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CorsPolicy {
    /// Add them to control-plane responses.
    pub(crate) for_api: bool,
    /// Add them to every response.
    pub(crate) for_all_responses: bool,
}

impl CorsPolicy {
    pub(crate) fn is_enabled(&self) -> bool {
        self.for_api || self.for_all_responses
    }
}

/// A response ready to be written, plus what to do with the socket afterwards.
#[derive(Debug)]
pub(crate) struct WrittenResponse {
    pub(crate) response: Response<Full<Bytes>>,
    pub(crate) close_socket: bool,
}

/// Applies the CORS and connection policies to outgoing responses.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResponseWriter {
    cors: CorsPolicy,
}

impl ResponseWriter {
    pub(crate) fn new(cors: CorsPolicy) -> Self {
        Self { cors }
    }

    pub(crate) fn cors(&self) -> CorsPolicy {
        self.cors
    }

    /// Write a control-plane response: a status with an optional text body.
    pub(crate) fn write_status(
        &self,
        request: &Request,
        status: StatusCode,
        body: impl Into<String>,
        content_type: &str,
    ) -> WrittenResponse {
        let body = body.into();
        let mut response = ResponseTemplate::new(status);
        if !body.is_empty() {
            response = response.set_body_raw(body, &format!("{}; charset=utf-8", content_type));
        }
        if self.cors.for_api {
            add_cors_headers(response.headers_mut());
        }
        self.write(request, response)
    }

    pub(crate) fn write(&self, request: &Request, mut response: ResponseTemplate) -> WrittenResponse {
        if self.cors.for_all_responses {
            add_cors_headers(response.headers_mut());
        }

        let options = response.connection_options().cloned().unwrap_or_default();
        if let Some(value) = connection_header(request, &options) {
            response
                .headers_mut()
                .insert(CONNECTION, HeaderValue::from_static(value));
        }
        WrittenResponse {
            response: response.generate_response(),
            close_socket: close_socket(request, &options),
        }
    }
}

fn add_cors_headers(headers: &mut HeaderMap) {
    for (name, value) in CORS_HEADERS.iter() {
        if !headers.contains_key(name) {
            headers.insert(name.clone(), value.clone());
        }
    }
}

/// The `Connection` header to send, if any.
///
/// An explicit keep-alive override always wins. Otherwise, unless the header is suppressed,
/// `keep-alive` is only sent if the client asked for it and the response does not force the
/// socket closed.
fn connection_header(request: &Request, options: &ConnectionOptions) -> Option<&'static str> {
    if let Some(keep_alive) = options.keep_alive_override {
        return Some(if keep_alive { "keep-alive" } else { "close" });
    }
    if options.suppress_connection_header == Some(true) {
        return None;
    }
    if request.is_keep_alive() && options.close_socket != Some(true) {
        Some("keep-alive")
    } else {
        Some("close")
    }
}

/// Whether the socket is closed once the response is written, independently of the
/// `Connection` header that was sent.
fn close_socket(request: &Request, options: &ConnectionOptions) -> bool {
    options
        .close_socket
        .unwrap_or_else(|| !request.is_keep_alive())
}
