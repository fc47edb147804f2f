//! What an expectation does once it matched an incoming request.
use crate::ResponseTemplate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

/// Proxy the matched request to another server and relay its response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpForward {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub scheme: Scheme,
}

fn default_port() -> u16 {
    80
}

impl HttpForward {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            scheme: Scheme::Http,
        }
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }
}

impl fmt::Display for HttpForward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Http => "http",
            Scheme::Https => "https",
        };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Simulate a broken server: write arbitrary bytes on the socket, bypassing HTTP framing,
/// and/or drop the connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpError {
    pub delay: Option<Duration>,
    pub drop_connection: bool,
    pub response_bytes: Option<Vec<u8>>,
}

impl HttpError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_drop_connection(mut self, drop_connection: bool) -> Self {
        self.drop_connection = drop_connection;
        self
    }

    pub fn with_response_bytes<B: Into<Vec<u8>>>(mut self, bytes: B) -> Self {
        self.response_bytes = Some(bytes.into());
        self
    }
}

/// Build the response in-process with the [`Respond`] implementation registered under
/// `callback_name` - see [`MockServer::register_callback`].
///
/// [`Respond`]: crate::Respond
/// [`MockServer::register_callback`]: crate::MockServer::register_callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpClassCallback {
    #[serde(rename = "callbackClass")]
    pub callback_name: String,
}

impl HttpClassCallback {
    pub fn new<T: Into<String>>(callback_name: T) -> Self {
        Self {
            callback_name: callback_name.into(),
        }
    }
}

/// Hand the request to a remote callback client and wait for it to send the response back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpObjectCallback {
    pub client_id: String,
}

impl HttpObjectCallback {
    pub fn new<T: Into<String>>(client_id: T) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }
}

/// The concrete action selected for a matched request.
#[derive(Debug, Clone)]
pub enum Action {
    Respond(ResponseTemplate),
    Forward(HttpForward),
    Error(HttpError),
    Callback(HttpClassCallback),
    ObjectCallback(HttpObjectCallback),
}

/// The actions configured on an expectation, one optional slot per kind.
#[derive(Debug, Clone, Default)]
pub struct ActionSet {
    pub(crate) response: Option<ResponseTemplate>,
    pub(crate) forward: Option<HttpForward>,
    pub(crate) error: Option<HttpError>,
    pub(crate) callback: Option<HttpClassCallback>,
    pub(crate) object_callback: Option<HttpObjectCallback>,
}

impl ActionSet {
    /// The first configured slot wins, in this order: response, forward, error,
    /// callback, object callback.
    ///
    /// An expectation without any action answers with a `404`.
    pub fn select(&self) -> Action {
        if let Some(response) = &self.response {
            Action::Respond(response.clone())
        } else if let Some(forward) = &self.forward {
            Action::Forward(forward.clone())
        } else if let Some(error) = &self.error {
            Action::Error(error.clone())
        } else if let Some(callback) = &self.callback {
            Action::Callback(callback.clone())
        } else if let Some(object_callback) = &self.object_callback {
            Action::ObjectCallback(object_callback.clone())
        } else {
            Action::Respond(ResponseTemplate::new(404))
        }
    }

    pub fn response(&self) -> Option<&ResponseTemplate> {
        self.response.as_ref()
    }

    pub fn forward(&self) -> Option<&HttpForward> {
        self.forward.as_ref()
    }

    pub fn error(&self) -> Option<&HttpError> {
        self.error.as_ref()
    }

    pub fn callback(&self) -> Option<&HttpClassCallback> {
        self.callback.as_ref()
    }

    pub fn object_callback(&self) -> Option<&HttpObjectCallback> {
        self.object_callback.as_ref()
    }
}
