use crate::{Request, ResponseTemplate};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Anything that implements `Respond` can build the response to an incoming request
/// in-process, when an expectation with an [`HttpClassCallback`] action matches.
///
/// Callbacks are registered on a [`MockServer`] under a name with
/// [`MockServer::register_callback`]; expectations refer to them by that name, which keeps
/// expectations serializable.
///
/// ## Fixed responses
///
/// The simplest `Respond` is [`ResponseTemplate`]: no matter the request, it will
/// always return itself.
///
/// ## Dynamic responses
///
/// You can use `Respond` to build responses that depend on the data in the matched request.
/// You could, for example, propagate back a request header in the response:
///
/// ```rust
/// use standin::{Expectation, HttpClassCallback, MockServer, Request, ResponseTemplate, Respond};
/// use standin::matchers::request;
///
/// /// Responds using the specified `ResponseTemplate`, but it dynamically populates the
/// /// `X-Correlation-Id` header from the request data.
/// pub struct CorrelationIdResponder(pub ResponseTemplate);
///
/// impl Respond for CorrelationIdResponder {
///     fn respond(&self, request: &Request) -> ResponseTemplate {
///         let mut response_template = self.0.clone();
///         if let Some(correlation_id) = request.first_header("x-correlation-id") {
///             response_template =
///                 response_template.insert_header("x-correlation-id", correlation_id);
///         }
///         response_template
///     }
/// }
///
/// #[async_std::main]
/// async fn main() {
///     // Arrange
///     let mock_server = MockServer::start().await;
///     let correlation_id = "1241-1245-1548-4567";
///     mock_server.register_callback(
///         "correlation-id",
///         CorrelationIdResponder(ResponseTemplate::new(200)),
///     );
///
///     Expectation::when(request().path("/hello"))
///         .then_callback(HttpClassCallback::new("correlation-id"))
///         .mount(&mock_server)
///         .await;
///
///     let response = reqwest::Client::new()
///         .get(format!("{}/hello", &mock_server.uri()))
///         .header("X-Correlation-Id", correlation_id)
///         .send()
///         .await
///         .unwrap();
///     assert_eq!(response.status(), 200);
///     assert_eq!(response.headers()["x-correlation-id"], correlation_id);
/// }
/// ```
///
/// [`HttpClassCallback`]: crate::HttpClassCallback
/// [`MockServer`]: crate::MockServer
/// [`MockServer::register_callback`]: crate::MockServer::register_callback
pub trait Respond: Send + Sync {
    /// Given a reference to a [`Request`] return a [`ResponseTemplate`] that will be used
    /// by the [`MockServer`] as blueprint for the response returned to the client.
    ///
    /// [`MockServer`]: crate::MockServer
    fn respond(&self, request: &Request) -> ResponseTemplate;
}

impl Respond for ResponseTemplate {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.clone()
    }
}

impl<F> Respond for F
where
    F: Fn(&Request) -> ResponseTemplate + Send + Sync,
{
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self(request)
    }
}

/// The named in-process callbacks available to expectations.
#[derive(Default)]
pub(crate) struct CallbackRegistry {
    callbacks: RwLock<HashMap<String, Arc<dyn Respond>>>,
}

impl CallbackRegistry {
    /// Register `responder` under `name`, replacing any callback with the same name.
    pub(crate) fn register(&self, name: String, responder: Arc<dyn Respond>) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, responder);
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<dyn Respond>> {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let callbacks = self.callbacks.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("CallbackRegistry")
            .field("names", &callbacks.keys().collect::<Vec<_>>())
            .finish()
    }
}
