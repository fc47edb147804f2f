use crate::callback_registry::CallbackClient;
use crate::expectation::{Expectation, ExpectationBuilder};
use crate::matchers::RequestPattern;
use crate::mock_server::bare_server::BareMockServer;
use crate::mock_server::MockServerBuilder;
use crate::request_log::LogEntry;
use crate::verification::{Verification, VerificationFailure, VerificationSequence};
use crate::{Request, Respond};
use log::debug;
use std::net::SocketAddr;
use std::sync::Arc;

/// An HTTP web-server running in the background to behave as one of your dependencies using
/// [`Expectation`]s for testing purposes.
///
/// Each instance of `MockServer` is fully isolated: [`MockServer::start`] takes care of finding a random port
/// available on your local machine which is assigned to the new `MockServer`.
///
/// You can use [`MockServer::builder`] if you need to specify custom configuration - e.g.
/// run on a specific port or enable CORS headers.
///
/// Expectations can be registered in-process, with [`MockServer::register`], or over HTTP
/// by any client with a `PUT /expectation` request: both end up in the same registry.
///
/// ## Best practices
///
/// You should use one instance of `MockServer` for each REST API that your application interacts
/// with and needs mocking for testing purposes.
///
/// To ensure full isolation and no cross-test interference, `MockServer`s shouldn't be
/// shared between tests. Instead, `MockServer`s should be created in the test where they are used.
pub struct MockServer(BareMockServer);

impl MockServer {
    pub(super) fn new(server: BareMockServer) -> Self {
        Self(server)
    }

    /// You can use `MockServer::builder` if you need to specify custom configuration - e.g.
    /// run on a specific port or enable CORS headers.
    ///
    /// If this is not your case, use [`MockServer::start`].
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start a new instance of a `MockServer` listening on a random port.
    ///
    /// ### Example:
    /// ```rust
    /// use standin::{Expectation, MockServer, ResponseTemplate};
    /// use standin::matchers::request;
    ///
    /// #[async_std::main]
    /// async fn main() {
    ///     // Arrange
    ///     let mock_server_one = MockServer::start().await;
    ///     let mock_server_two = MockServer::start().await;
    ///
    ///     assert!(mock_server_one.address() != mock_server_two.address());
    ///
    ///     Expectation::when(request().method("GET"))
    ///         .then_respond(ResponseTemplate::new(200))
    ///         // Mounted on the first mock server only!
    ///         .mount(&mock_server_one)
    ///         .await;
    ///
    ///     // Act
    ///     let status = reqwest::get(&mock_server_one.uri()).await.unwrap().status();
    ///     assert_eq!(status, 200);
    ///
    ///     // The second mock server knows nothing about our expectation.
    ///     let status = reqwest::get(&mock_server_two.uri()).await.unwrap().status();
    ///     assert_eq!(status, 404);
    /// }
    /// ```
    pub async fn start() -> Self {
        Self::builder().start().await
    }

    /// Register an expectation at the lowest priority.
    ///
    /// [`ExpectationBuilder::mount`] is a shorthand for this method.
    pub async fn register(&self, expectation: ExpectationBuilder) -> Arc<Expectation> {
        let expectation = self.0.handler().registry().register(expectation);
        debug!("Registered expectation {}.", expectation.id());
        expectation
    }

    /// The expectations that can still match a request, in priority order. With a `filter`,
    /// only the expectations matching every request the filter describes are returned.
    pub async fn expectations(&self, filter: Option<&RequestPattern>) -> Vec<Arc<Expectation>> {
        self.0.handler().registry().list(filter)
    }

    /// Remove the expectations selected by `filter` and forget the requests it matches.
    /// Returns how many expectations were removed.
    pub async fn clear(&self, filter: &RequestPattern) -> usize {
        self.0.handler().log().clear(Some(filter));
        self.0.handler().registry().clear(Some(filter))
    }

    /// Drop all expectations from an instance of [`MockServer`].
    /// It also deletes all recorded requests.
    ///
    /// ### Example
    ///
    /// ```rust
    /// use standin::{Expectation, MockServer, ResponseTemplate};
    /// use standin::matchers::request;
    ///
    /// #[async_std::main]
    /// async fn main() {
    ///     // Arrange
    ///     let mock_server = MockServer::start().await;
    ///     Expectation::when(request().method("GET"))
    ///         .then_respond(ResponseTemplate::new(200))
    ///         .mount(&mock_server)
    ///         .await;
    ///
    ///     // Act
    ///     let status = reqwest::get(&mock_server.uri()).await.unwrap().status();
    ///     assert_eq!(status, 200);
    ///
    ///     // Reset the server
    ///     mock_server.reset().await;
    ///
    ///     // This would have matched our expectation, but we have dropped it resetting the server!
    ///     let status = reqwest::get(&mock_server.uri()).await.unwrap().status();
    ///     assert_eq!(status, 404);
    ///     // Only the request made after the reset is remembered.
    ///     assert_eq!(mock_server.received_requests().await.len(), 1);
    /// }
    /// ```
    pub async fn reset(&self) {
        self.0.handler().registry().reset();
        self.0.handler().log().reset();
    }

    /// Make `responder` available to expectations performing an
    /// [`HttpClassCallback`](crate::HttpClassCallback) named `name`.
    ///
    /// Registering a second callback with the same name replaces the first one.
    pub fn register_callback<R: Respond + 'static>(&self, name: impl Into<String>, responder: R) {
        self.0
            .handler()
            .callbacks()
            .register(name.into(), Arc::new(responder));
    }

    /// Connect a callback client: requests matched by an expectation performing an
    /// [`HttpObjectCallback`](crate::HttpObjectCallback) with this `client_id` are handed to it.
    ///
    /// Connecting again with the same id replaces the previous client.
    ///
    /// ### Example:
    /// ```rust
    /// use standin::{Expectation, HttpObjectCallback, MockServer, ResponseTemplate};
    /// use standin::matchers::request;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let mock_server = MockServer::start().await;
    ///     let mut client = mock_server.callback_client("my-client");
    ///     Expectation::when(request().path("/hello"))
    ///         .then_object_callback(HttpObjectCallback::new("my-client"))
    ///         .mount(&mock_server)
    ///         .await;
    ///
    ///     tokio::spawn(async move {
    ///         while let Some(callback) = client.next_request().await {
    ///             let body = format!("hello from {}", callback.request.url.path());
    ///             let _ = client.respond(
    ///                 callback.correlation_id,
    ///                 ResponseTemplate::new(200).set_body_string(body),
    ///             );
    ///         }
    ///     });
    ///
    ///     let body = reqwest::get(format!("{}/hello", mock_server.uri()))
    ///         .await
    ///         .unwrap()
    ///         .text()
    ///         .await
    ///         .unwrap();
    ///     assert_eq!(body, "hello from /hello");
    /// }
    /// ```
    pub fn callback_client(&self, client_id: impl Into<String>) -> CallbackClient {
        self.0.handler().clients().register_client(client_id.into())
    }

    /// Whether a [`CallbackClient`] is currently connected with this id.
    pub fn is_callback_client_connected(&self, client_id: &str) -> bool {
        self.0.handler().clients().is_connected(client_id)
    }

    /// Return the base uri of this running instance of `MockServer`, e.g. `http://127.0.0.1:4372`.
    ///
    /// Use this method to compose uris when interacting with this instance of `MockServer` via
    /// an HTTP client.
    pub fn uri(&self) -> String {
        self.0.uri()
    }

    /// Return the socket address of this running instance of `MockServer`, e.g. `127.0.0.1:4372`.
    ///
    /// Use this method to interact with the `MockServer` using `TcpStream`s.
    ///
    /// ### Example:
    /// ```rust
    /// use standin::MockServer;
    /// use std::net::TcpStream;
    ///
    /// #[async_std::main]
    /// async fn main() {
    ///     // Act - the server is started
    ///     let mock_server = MockServer::start().await;
    ///
    ///     // Assert - we can connect to it
    ///     assert!(TcpStream::connect(mock_server.address()).is_ok());
    /// }
    /// ```
    pub fn address(&self) -> &SocketAddr {
        self.0.address()
    }

    /// Every port the server listens on: the one it started with, then those bound
    /// through `PUT /bind`.
    pub fn ports(&self) -> Vec<u16> {
        self.0.handler().ports().ports()
    }

    /// Whether the server was stopped through `PUT /stop`.
    pub fn is_stopped(&self) -> bool {
        self.0.handler().ports().is_stopped()
    }

    /// Return a vector with all the requests received by the `MockServer` since it started,
    /// or since it was last reset. Control-plane requests are not recorded.
    ///
    /// ### Example:
    ///
    /// ```rust
    /// use standin::MockServer;
    /// use http::Method;
    ///
    /// #[async_std::main]
    /// async fn main() {
    ///     // Arrange
    ///     let mock_server = MockServer::start().await;
    ///
    ///     // Act
    ///     reqwest::get(&mock_server.uri()).await.unwrap();
    ///
    ///     // Assert
    ///     let received_requests = mock_server.received_requests().await;
    ///     assert_eq!(received_requests.len(), 1);
    ///
    ///     let received_request = &received_requests[0];
    ///     assert_eq!(received_request.method, Method::GET);
    ///     assert_eq!(received_request.url.path(), "/");
    ///     assert!(received_request.body.is_empty());
    /// }
    /// ```
    pub async fn received_requests(&self) -> Vec<Request> {
        self.0.handler().log().retrieve(None)
    }

    /// The recorded requests together with the responses they got, when one was written
    /// through the HTTP pipeline.
    pub async fn request_log(&self) -> Vec<LogEntry> {
        self.0.handler().log().entries_snapshot()
    }

    /// Check how many recorded requests matched a pattern. See [`Verification`].
    pub fn verify(&self, verification: &Verification) -> Result<(), VerificationFailure> {
        self.0.handler().log().verify(verification)
    }

    /// Check that requests matching each pattern were received in order.
    pub fn verify_sequence(&self, sequence: &VerificationSequence) -> Result<(), VerificationFailure> {
        self.0.handler().log().verify_sequence(sequence)
    }
}
