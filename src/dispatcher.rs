use crate::action::{Action, HttpError, HttpForward, Scheme};
use crate::callback_registry::CallbackClientRegistry;
use crate::error::DispatchError;
use crate::respond::CallbackRegistry;
use crate::{ConnectionOptions, Request, ResponseTemplate};
use async_trait::async_trait;
use http::header::{CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::HeaderValue;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// What performing an action produced.
#[derive(Debug)]
pub(crate) enum Dispatched {
    /// A response to serialize and write through the usual response pipeline.
    Response(ResponseTemplate),
    /// Bytes to write on the socket as they are, bypassing HTTP framing.
    Raw {
        bytes: Option<Vec<u8>>,
        drop_connection: bool,
    },
}

/// Proxies a matched request to another server, for [`HttpForward`] actions.
///
/// [`HyperForwarder`] is used unless another implementation is configured with
/// [`MockServerBuilder::forwarder`].
///
/// [`MockServerBuilder::forwarder`]: crate::MockServerBuilder::forwarder
#[async_trait]
pub trait Forward: Send + Sync {
    async fn forward(
        &self,
        target: &HttpForward,
        request: &Request,
    ) -> Result<ResponseTemplate, DispatchError>;
}

/// Forwards requests over a fresh plain-HTTP/1.1 connection for each request.
#[derive(Debug, Default, Clone, Copy)]
pub struct HyperForwarder;

#[async_trait]
impl Forward for HyperForwarder {
    async fn forward(
        &self,
        target: &HttpForward,
        request: &Request,
    ) -> Result<ResponseTemplate, DispatchError> {
        if target.scheme == Scheme::Https {
            return Err(DispatchError::UnsupportedScheme(target.to_string()));
        }
        let failed = |message: String| DispatchError::Forward {
            target: target.to_string(),
            message,
        };

        let stream = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|e| failed(e.to_string()))?;
        let (mut sender, connection) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream))
                .await
                .map_err(|e| failed(e.to_string()))?;
        let destination = target.to_string();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Connection to {} failed: {}", destination, e);
            }
        });

        let path_and_query = &request.url[url::Position::BeforePath..];
        let mut outbound = hyper::Request::builder()
            .method(request.method.clone())
            .uri(path_and_query)
            .body(Full::new(Bytes::from(request.body.clone())))
            .map_err(|e| failed(e.to_string()))?;
        *outbound.headers_mut() = request.headers.clone();
        let host = HeaderValue::from_str(&format!("{}:{}", target.host, target.port))
            .map_err(|e| failed(e.to_string()))?;
        outbound.headers_mut().insert(HOST, host);

        let response = sender
            .send_request(outbound)
            .await
            .map_err(|e| failed(e.to_string()))?;
        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| failed(e.to_string()))?
            .to_bytes();

        // The response is re-framed when written back.
        let mut headers = parts.headers;
        for hop_by_hop in [CONNECTION, TRANSFER_ENCODING, CONTENT_LENGTH] {
            headers.remove(hop_by_hop);
        }
        Ok(ResponseTemplate::new(parts.status)
            .append_header_map(headers)
            .set_body_bytes(body.to_vec()))
    }
}

/// Performs the action selected for a matched request.
pub(crate) struct ActionDispatcher {
    callbacks: Arc<CallbackRegistry>,
    clients: CallbackClientRegistry,
    forwarder: Arc<dyn Forward>,
}

impl ActionDispatcher {
    pub(crate) fn new(
        callbacks: Arc<CallbackRegistry>,
        clients: CallbackClientRegistry,
        forwarder: Arc<dyn Forward>,
    ) -> Self {
        Self {
            callbacks,
            clients,
            forwarder,
        }
    }

    pub(crate) async fn dispatch(
        &self,
        action: Action,
        request: &Request,
    ) -> Result<Dispatched, DispatchError> {
        match action {
            Action::Respond(response) => Ok(Dispatched::Response(delayed(response).await)),
            Action::Forward(target) => {
                debug!("Forwarding {} {} to {}", request.method, request.url, target);
                let response = self.forwarder.forward(&target, request).await?;
                Ok(Dispatched::Response(response))
            }
            Action::Error(HttpError {
                delay,
                drop_connection,
                response_bytes,
            }) => {
                sleep(delay).await;
                Ok(Dispatched::Raw {
                    bytes: response_bytes,
                    drop_connection,
                })
            }
            Action::Callback(callback) => {
                let responder = self
                    .callbacks
                    .get(&callback.callback_name)
                    .ok_or(DispatchError::UnknownCallback(callback.callback_name))?;
                let response = responder.respond(request);
                Ok(Dispatched::Response(delayed(response).await))
            }
            Action::ObjectCallback(callback) => {
                let pending = self.clients.send(&callback.client_id, request.clone())?;
                // No timeout: the request waits until the client answers, detaches or the
                // connection goes away.
                let response = pending
                    .wait()
                    .await?
                    .set_connection_options(ConnectionOptions::new().with_close_socket(true));
                Ok(Dispatched::Response(delayed(response).await))
            }
        }
    }
}

impl std::fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("callbacks", &self.callbacks)
            .field("clients", &self.clients)
            .finish()
    }
}

async fn delayed(response: ResponseTemplate) -> ResponseTemplate {
    sleep(response.delay()).await;
    response
}

async fn sleep(delay: Option<Duration>) {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{HttpClassCallback, HttpObjectCallback};
    use http::Method;
    use std::time::Instant;
    use url::Url;

    fn get(path: &str) -> Request {
        Request::new(
            Method::GET,
            Url::parse(&format!("http://localhost{}", path)).unwrap(),
        )
    }

    fn dispatcher() -> (ActionDispatcher, Arc<CallbackRegistry>, CallbackClientRegistry) {
        let callbacks = Arc::new(CallbackRegistry::default());
        let clients = CallbackClientRegistry::default();
        let dispatcher =
            ActionDispatcher::new(callbacks.clone(), clients.clone(), Arc::new(HyperForwarder));
        (dispatcher, callbacks, clients)
    }

    fn response_status(dispatched: Dispatched) -> u16 {
        match dispatched {
            Dispatched::Response(response) => response.status_code().as_u16(),
            Dispatched::Raw { .. } => panic!("Expected a response"),
        }
    }

    #[tokio::test]
    async fn responses_are_delayed() {
        // Arrange
        let (dispatcher, _, _) = dispatcher();
        let delay = Duration::from_millis(100);
        let action = Action::Respond(ResponseTemplate::new(200).set_delay(delay));

        // Act
        let start = Instant::now();
        let outcome = dispatcher.dispatch(action, &get("/")).await.unwrap();

        // Assert
        assert!(start.elapsed() >= delay);
        assert_eq!(response_status(outcome), 200);
    }

    #[tokio::test]
    async fn errors_bypass_the_response_pipeline() {
        // Arrange
        let (dispatcher, _, _) = dispatcher();
        let action = Action::Error(
            HttpError::new()
                .with_response_bytes(b"garbage".to_vec())
                .with_drop_connection(true),
        );

        // Act
        let outcome = dispatcher.dispatch(action, &get("/")).await.unwrap();

        // Assert
        match outcome {
            Dispatched::Raw {
                bytes,
                drop_connection,
            } => {
                assert_eq!(bytes.as_deref(), Some(&b"garbage"[..]));
                assert!(drop_connection);
            }
            Dispatched::Response(_) => panic!("Expected raw bytes"),
        }
    }

    #[tokio::test]
    async fn named_callbacks_build_the_response_from_the_request() {
        // Arrange
        let (dispatcher, callbacks, _) = dispatcher();
        callbacks.register(
            "echo-path".into(),
            Arc::new(|request: &Request| {
                ResponseTemplate::new(200).set_body_string(request.url.path())
            }),
        );
        let action = Action::Callback(HttpClassCallback::new("echo-path"));

        // Act
        let outcome = dispatcher.dispatch(action, &get("/hello")).await.unwrap();

        // Assert
        match outcome {
            Dispatched::Response(response) => assert_eq!(response.body(), Some(&b"/hello"[..])),
            Dispatched::Raw { .. } => panic!("Expected a response"),
        }
    }

    #[tokio::test]
    async fn unknown_callbacks_are_dispatch_errors() {
        let (dispatcher, _, _) = dispatcher();
        let action = Action::Callback(HttpClassCallback::new("missing"));

        let outcome = dispatcher.dispatch(action, &get("/")).await;

        assert!(matches!(outcome, Err(DispatchError::UnknownCallback(name)) if name == "missing"));
    }

    #[tokio::test]
    async fn remote_callback_responses_close_the_socket() {
        // Arrange
        let (dispatcher, _, clients) = dispatcher();
        let mut client = clients.register_client("c1".into());
        let responder = tokio::spawn(async move {
            let callback_request = client.next_request().await.unwrap();
            client
                .respond(callback_request.correlation_id, ResponseTemplate::new(201))
                .unwrap();
            client
        });
        let action = Action::ObjectCallback(HttpObjectCallback::new("c1"));

        // Act
        let outcome = dispatcher.dispatch(action, &get("/")).await.unwrap();

        // Assert
        match outcome {
            Dispatched::Response(response) => {
                assert_eq!(response.status_code(), 201);
                assert_eq!(
                    response.connection_options().and_then(|o| o.close_socket),
                    Some(true)
                );
            }
            Dispatched::Raw { .. } => panic!("Expected a response"),
        }
        drop(responder.await.unwrap());
    }

    #[tokio::test]
    async fn remote_callback_connection_options_are_replaced() {
        // Arrange
        let (dispatcher, _, clients) = dispatcher();
        let mut client = clients.register_client("c1".into());
        let responder = tokio::spawn(async move {
            let callback_request = client.next_request().await.unwrap();
            let response = ResponseTemplate::new(200).set_connection_options(
                ConnectionOptions::new()
                    .with_keep_alive_override(true)
                    .with_suppress_connection_header(true),
            );
            client
                .respond(callback_request.correlation_id, response)
                .unwrap();
            client
        });
        let action = Action::ObjectCallback(HttpObjectCallback::new("c1"));

        // Act
        let outcome = dispatcher.dispatch(action, &get("/")).await.unwrap();

        // Assert
        match outcome {
            Dispatched::Response(response) => assert_eq!(
                response.connection_options(),
                Some(&ConnectionOptions::new().with_close_socket(true))
            ),
            Dispatched::Raw { .. } => panic!("Expected a response"),
        }
        drop(responder.await.unwrap());
    }

    #[tokio::test]
    async fn https_targets_are_rejected() {
        let (dispatcher, _, _) = dispatcher();
        let target = HttpForward::new("localhost", 443).with_scheme(Scheme::Https);

        let outcome = dispatcher.dispatch(Action::Forward(target), &get("/")).await;

        assert!(matches!(outcome, Err(DispatchError::UnsupportedScheme(_))));
    }
}
