use std::io;

/// Errors surfaced by a [`MockServer`] while serving a request.
///
/// Every variant is answered with a `400 Bad Request` carrying the error message.
///
/// [`MockServer`]: crate::MockServer
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The body of a control-plane request could not be decoded.
    #[error("{0}")]
    MalformedRequest(String),
    /// An additional port could not be bound.
    #[error("Exception while binding MockServer to port {port} port already in use")]
    PortConflict {
        port: u16,
        #[source]
        source: io::Error,
    },
    /// The matched expectation's action could not be carried out.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl Error {
    pub(crate) fn malformed<E: std::fmt::Display>(e: E) -> Self {
        Error::MalformedRequest(e.to_string())
    }

    pub fn status_code(&self) -> http::StatusCode {
        http::StatusCode::BAD_REQUEST
    }
}

/// Failures while performing the action of a matched expectation.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no callback registered under the name `{0}`")]
    UnknownCallback(String),
    #[error("no callback client connected with id `{0}`")]
    CallbackClientNotConnected(String),
    #[error("callback client `{0}` disconnected before responding")]
    CallbackClientDisconnected(String),
    #[error("failed to forward request to {target}: {message}")]
    Forward { target: String, message: String },
    #[error("forwarding to {0} is not supported: only plain HTTP targets can be reached")]
    UnsupportedScheme(String),
}

/// Failures when a callback client delivers a response.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    /// Nothing is waiting for this response: the request was already answered, its connection
    /// went away, or the correlation id was never issued to this client.
    #[error("no request pending for client `{client_id}` with correlation id {correlation_id}")]
    NoPendingRequest {
        client_id: String,
        correlation_id: u64,
    },
}
