use crate::dispatcher::{Forward, HyperForwarder};
use crate::expectation_registry::{ClearMode, ExpectationRegistry};
use crate::handler::MockServerHandler;
use crate::mock_server::bare_server::BareMockServer;
use crate::mock_server::ports::PortRegistry;
use crate::request::{BodyPrintLimit, BODY_PRINT_LIMIT};
use crate::response_writer::CorsPolicy;
use crate::MockServer;
use std::env;
use std::net::TcpListener;
use std::sync::Arc;

/// A builder providing a fluent API to assemble a [`MockServer`] step-by-step.
/// Use [`MockServer::builder`] to get started.
pub struct MockServerBuilder {
    listener: Option<TcpListener>,
    body_print_limit: BodyPrintLimit,
    overlap_cap: Option<u64>,
    clear_mode: ClearMode,
    cors: CorsPolicy,
    forwarder: Arc<dyn Forward>,
}

impl MockServerBuilder {
    pub(super) fn new() -> Self {
        let body_print_limit = match env::var("STANDIN_BODY_PRINT_LIMIT")
            .ok()
            .and_then(|x| x.parse::<usize>().ok())
        {
            Some(limit) => BodyPrintLimit::Limited(limit),
            None => BodyPrintLimit::Limited(BODY_PRINT_LIMIT),
        };
        Self {
            listener: None,
            body_print_limit,
            overlap_cap: None,
            clear_mode: ClearMode::default(),
            cors: CorsPolicy {
                for_api: env_flag("STANDIN_CORS_FOR_API"),
                for_all_responses: env_flag("STANDIN_CORS_FOR_ALL_RESPONSES"),
            },
            forwarder: Arc::new(HyperForwarder),
        }
    }

    /// Each instance of [`MockServer`] is, by default, running on a random
    /// port available on your local machine.
    /// With `MockServerBuilder::listener` you can choose to start the `MockServer`
    /// instance on a specific port you have already bound.
    ///
    /// ### Example:
    /// ```rust
    /// use standin::MockServer;
    ///
    /// #[async_std::main]
    /// async fn main() {
    ///     // Arrange
    ///     let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    ///     let expected_server_address = listener
    ///         .local_addr()
    ///         .expect("Failed to get server address.");
    ///
    ///     // Act
    ///     let mock_server = MockServer::builder().listener(listener).start().await;
    ///
    ///     // Assert
    ///     assert_eq!(&expected_server_address, mock_server.address());
    /// }
    /// ```
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// The mock server logs the requests that did not match any expectation.
    /// By default, the size of the printed body is limited.
    ///
    /// You may want to change this if you're working with services with very large
    /// bodies, or when printing the logs to a file where size matters
    /// less than in a terminal window. You can configure this limit with
    /// `MockServerBuilder::body_print_limit` or the `STANDIN_BODY_PRINT_LIMIT`
    /// environment variable.
    pub fn body_print_limit(mut self, limit: BodyPrintLimit) -> Self {
        self.body_print_limit = limit;
        self
    }

    /// When an expectation is registered for the same request pattern as an unlimited one,
    /// the older one is capped to `cap` remaining matches so that the newer one gets a
    /// chance to be used. Defaults to `1`.
    ///
    /// See [`ExpectationRegistry::with_overlap_cap`].
    ///
    /// [`ExpectationRegistry::with_overlap_cap`]: crate::ExpectationRegistry::with_overlap_cap
    pub fn overlap_cap(mut self, cap: u64) -> Self {
        self.overlap_cap = Some(cap);
        self
    }

    /// How `PUT /clear` selects the expectations to remove. Defaults to [`ClearMode::Loose`].
    pub fn clear_mode(mut self, clear_mode: ClearMode) -> Self {
        self.clear_mode = clear_mode;
        self
    }

    /// Add CORS headers to control-plane responses and answer CORS preflight requests.
    ///
    /// Also enabled by setting `STANDIN_CORS_FOR_API=true`.
    pub fn cors_for_api(mut self, enabled: bool) -> Self {
        self.cors.for_api = enabled;
        self
    }

    /// Add CORS headers to every response, mocked ones included.
    ///
    /// Also enabled by setting `STANDIN_CORS_FOR_ALL_RESPONSES=true`.
    pub fn cors_for_all_responses(mut self, enabled: bool) -> Self {
        self.cors.for_all_responses = enabled;
        self
    }

    /// Replace the [`HyperForwarder`] used to perform forward actions.
    pub fn forwarder<F: Forward + 'static>(mut self, forwarder: F) -> Self {
        self.forwarder = Arc::new(forwarder);
        self
    }

    /// Finalise the builder to get an instance of a [`BareMockServer`].
    pub(super) fn build_bare(self) -> BareMockServer {
        let listener = if let Some(listener) = self.listener {
            listener
        } else {
            TcpListener::bind("127.0.0.1:0").expect("Failed to bind an OS port for a mock server.")
        };
        let address = listener
            .local_addr()
            .expect("Failed to get server address.");

        let mut registry = ExpectationRegistry::new().with_clear_mode(self.clear_mode);
        if let Some(cap) = self.overlap_cap {
            registry = registry.with_overlap_cap(cap);
        }
        let handler = MockServerHandler::new(
            registry,
            self.forwarder,
            self.cors,
            PortRegistry::new(address),
            self.body_print_limit,
        );
        BareMockServer::start(listener, Arc::new(handler))
    }

    /// Finalise the builder and launch the [`MockServer`] instance!
    pub async fn start(self) -> MockServer {
        MockServer::new(self.build_bare())
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name).map_or(false, |value| value.eq_ignore_ascii_case("true"))
}
