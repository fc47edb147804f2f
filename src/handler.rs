use crate::action::Action;
use crate::callback_registry::CallbackClientRegistry;
use crate::dispatcher::{ActionDispatcher, Dispatched, Forward};
use crate::error::Error;
use crate::expectation_registry::ExpectationRegistry;
use crate::mock_server::ports::PortRegistry;
use crate::request::BodyPrintLimit;
use crate::request_log::RequestLog;
use crate::respond::CallbackRegistry;
use crate::response_writer::{CorsPolicy, ResponseWriter, WrittenResponse};
use crate::serialization::{self, PortBinding};
use crate::{Request, ResponseTemplate};
use http::{Method, StatusCode};
use log::{debug, info, warn};
use std::net::TcpListener;
use std::sync::Arc;

const JSON: &str = "application/json";
const TEXT: &str = "text/plain";

/// What the transport has to do to answer a request.
#[derive(Debug)]
pub(crate) enum Outcome {
    Respond(WrittenResponse),
    /// Write `response`, then start serving on the freshly bound `listeners`.
    Bind {
        response: WrittenResponse,
        listeners: Vec<TcpListener>,
    },
    /// Hand the socket over: write `bytes` verbatim, then drop the connection if asked to.
    Raw {
        bytes: Option<Vec<u8>>,
        drop_connection: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retrieve {
    Expectations,
    Requests,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Rust,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clear {
    Expectations,
    Log,
    All,
}

/// Routes each request either to the control plane or through expectation matching.
#[derive(Debug)]
pub(crate) struct MockServerHandler {
    registry: ExpectationRegistry,
    log: RequestLog,
    callbacks: Arc<CallbackRegistry>,
    clients: CallbackClientRegistry,
    dispatcher: ActionDispatcher,
    writer: ResponseWriter,
    ports: PortRegistry,
    body_print_limit: BodyPrintLimit,
}

impl MockServerHandler {
    pub(crate) fn new(
        registry: ExpectationRegistry,
        forwarder: Arc<dyn Forward>,
        cors: CorsPolicy,
        ports: PortRegistry,
        body_print_limit: BodyPrintLimit,
    ) -> Self {
        let callbacks = Arc::new(CallbackRegistry::default());
        let clients = CallbackClientRegistry::default();
        let dispatcher = ActionDispatcher::new(callbacks.clone(), clients.clone(), forwarder);
        Self {
            registry,
            log: RequestLog::default(),
            callbacks,
            clients,
            dispatcher,
            writer: ResponseWriter::new(cors),
            ports,
            body_print_limit,
        }
    }

    pub(crate) fn registry(&self) -> &ExpectationRegistry {
        &self.registry
    }

    pub(crate) fn log(&self) -> &RequestLog {
        &self.log
    }

    pub(crate) fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub(crate) fn clients(&self) -> &CallbackClientRegistry {
        &self.clients
    }

    pub(crate) fn ports(&self) -> &PortRegistry {
        &self.ports
    }

    pub(crate) async fn handle(&self, request: Request) -> Outcome {
        match self.route(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Failed to process {} {}: {}", request.method, request.url, e);
                Outcome::Respond(self.write_error(&request, e))
            }
        }
    }

    fn write_error(&self, request: &Request, error: Error) -> WrittenResponse {
        let message = error.to_string();
        match error {
            // Only the status helper adds the API CORS headers, malformed bodies skip it.
            Error::MalformedRequest(_) => self.writer.write(
                request,
                ResponseTemplate::new(error.status_code())
                    .set_body_raw(message, &format!("{}; charset=utf-8", TEXT)),
            ),
            Error::PortConflict { .. } => {
                self.writer
                    .write_status(request, error.status_code(), message, TEXT)
            }
            Error::Dispatch(_) => self.writer.write(
                request,
                ResponseTemplate::new(error.status_code()).set_body_bytes(message),
            ),
        }
    }

    async fn route(&self, request: &Request) -> Result<Outcome, Error> {
        if self.writer.cors().is_enabled()
            && request.method == Method::OPTIONS
            && request.first_header("origin").is_some()
        {
            return Ok(self.status(request, StatusCode::OK));
        }
        if request.method != Method::PUT {
            return self.serve_expectation(request).await;
        }

        let body = request.body.as_slice();
        match request.url.path() {
            "/status" => {
                let ports = PortBinding {
                    ports: self.ports.ports(),
                };
                Ok(self.json(request, StatusCode::OK, &ports))
            }
            "/bind" => {
                let requested: PortBinding =
                    serialization::parse_optional(body)?.unwrap_or_default();
                let listeners = self.ports.bind(&requested.ports)?;
                let bound = PortBinding {
                    ports: listeners
                        .iter()
                        .filter_map(|l| l.local_addr().ok())
                        .map(|a| a.port())
                        .collect(),
                };
                info!("Bound additional ports {:?}", bound.ports);
                let response = self.writer.write_status(
                    request,
                    StatusCode::OK,
                    serde_json::to_string(&bound).unwrap_or_default(),
                    JSON,
                );
                Ok(Outcome::Bind {
                    response,
                    listeners,
                })
            }
            "/expectation" => {
                for builder in serialization::parse_expectations(body)? {
                    let expectation = self.registry.register(builder);
                    info!(
                        "creating expectation {}:\n{}",
                        expectation.id(),
                        serialization::expectation_to_json(&expectation)
                    );
                }
                Ok(self.status(request, StatusCode::CREATED))
            }
            "/clear" => {
                let filter = serialization::parse_pattern(body)?;
                let clear = match query(request, "type").as_deref() {
                    None | Some("all") => Clear::All,
                    Some("expectations") => Clear::Expectations,
                    Some("log") => Clear::Log,
                    Some(other) => {
                        return Err(Error::MalformedRequest(format!(
                            "\"{}\" is not a valid value for \"type\" parameter, only the following values are supported [expectations, log, all]",
                            other
                        )))
                    }
                };
                if clear != Clear::Log {
                    let removed = self.registry.clear(filter.as_ref());
                    debug!("Cleared {} expectation(s).", removed);
                }
                if clear != Clear::Expectations {
                    self.log.clear(filter.as_ref());
                }
                Ok(self.status(request, StatusCode::OK))
            }
            "/reset" => {
                self.registry.reset();
                self.log.reset();
                info!("Reset all expectations and the request log.");
                Ok(self.status(request, StatusCode::OK))
            }
            "/dumpToLog" => {
                let filter = serialization::parse_pattern(body)?;
                let expectations = self.registry.list(filter.as_ref());
                let dump = match format(request)? {
                    Format::Json => serialization::expectations_to_json(&expectations),
                    Format::Rust => serialization::expectations_to_rust(&expectations),
                };
                info!(target: "standin::expectations", "{}", dump);
                Ok(self.status(request, StatusCode::OK))
            }
            "/retrieve" => {
                let filter = serialization::parse_pattern(body)?;
                let retrieve = match query(request, "type").as_deref() {
                    None | Some("expectations") => Retrieve::Expectations,
                    Some("requests") => Retrieve::Requests,
                    Some(other) => {
                        return Err(Error::MalformedRequest(format!(
                            "\"{}\" is not a valid value for \"type\" parameter, only the following values are supported [expectations, requests]",
                            other
                        )))
                    }
                };
                let (body, content_type) = match (retrieve, format(request)?) {
                    (Retrieve::Expectations, Format::Json) => (
                        serialization::expectations_to_json(&self.registry.list(filter.as_ref())),
                        JSON,
                    ),
                    (Retrieve::Expectations, Format::Rust) => (
                        serialization::expectations_to_rust(&self.registry.list(filter.as_ref())),
                        TEXT,
                    ),
                    (Retrieve::Requests, Format::Json) => (
                        serialization::requests_to_json(&self.log.retrieve(filter.as_ref())),
                        JSON,
                    ),
                    (Retrieve::Requests, Format::Rust) => {
                        return Err(Error::MalformedRequest(
                            "recorded requests can only be retrieved as json".into(),
                        ))
                    }
                };
                Ok(Outcome::Respond(self.writer.write_status(
                    request,
                    StatusCode::OK,
                    body,
                    content_type,
                )))
            }
            "/verify" => {
                let verification = serialization::parse_verification(body)?;
                info!("verifying requests that match:\n{:?}", verification);
                Ok(self.verified(request, self.log.verify(&verification)))
            }
            "/verifySequence" => {
                let sequence = serialization::parse_verification_sequence(body)?;
                info!("verifying sequence that match:\n{:?}", sequence);
                Ok(self.verified(request, self.log.verify_sequence(&sequence)))
            }
            "/stop" => {
                info!("Stopping the mock server.");
                self.ports.stop();
                Ok(self.status(request, StatusCode::OK))
            }
            _ => self.serve_expectation(request).await,
        }
    }

    async fn serve_expectation(&self, request: &Request) -> Result<Outcome, Error> {
        let Some(expectation) = self.registry.find_and_consume(request) else {
            let mut printed = String::new();
            let _ = request.print_with_limit(&mut printed, self.body_print_limit);
            debug!("Got unexpected request:\n{}", printed);
            let response = ResponseTemplate::new(StatusCode::NOT_FOUND);
            self.log.record_response(request.clone(), response.clone());
            return Ok(Outcome::Respond(self.writer.write(request, response)));
        };

        let action = expectation.action();
        debug!(
            "Request {} {} matched expectation {}",
            request.method,
            request.url,
            expectation.id()
        );
        // Requests that may never get an HTTP response are logged right away.
        let logged_on_arrival = matches!(action, Action::Error(_) | Action::ObjectCallback(_));
        if logged_on_arrival {
            self.log.record(request.clone());
        }

        match self.dispatcher.dispatch(action, request).await? {
            Dispatched::Response(response) => {
                if !logged_on_arrival {
                    self.log.record_response(request.clone(), response.clone());
                }
                debug!(
                    "returning response {} for request {} {}",
                    response.status_code(),
                    request.method,
                    request.url
                );
                Ok(Outcome::Respond(self.writer.write(request, response)))
            }
            Dispatched::Raw {
                bytes,
                drop_connection,
            } => Ok(Outcome::Raw {
                bytes,
                drop_connection,
            }),
        }
    }

    fn status(&self, request: &Request, status: StatusCode) -> Outcome {
        Outcome::Respond(self.writer.write_status(request, status, "", JSON))
    }

    fn json<T: serde::Serialize>(&self, request: &Request, status: StatusCode, body: &T) -> Outcome {
        let body = serde_json::to_string(body).unwrap_or_default();
        Outcome::Respond(self.writer.write_status(request, status, body, JSON))
    }

    fn verified(
        &self,
        request: &Request,
        outcome: Result<(), crate::VerificationFailure>,
    ) -> Outcome {
        match outcome {
            Ok(()) => self.status(request, StatusCode::ACCEPTED),
            Err(failure) => Outcome::Respond(self.writer.write_status(
                request,
                StatusCode::NOT_ACCEPTABLE,
                failure.message(),
                TEXT,
            )),
        }
    }
}

fn query(request: &Request, name: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn format(request: &Request) -> Result<Format, Error> {
    match query(request, "format").as_deref() {
        None | Some("json") => Ok(Format::Json),
        Some("rust") => Ok(Format::Rust),
        Some(other) => Err(Error::MalformedRequest(format!(
            "\"{}\" is not a valid value for \"format\" parameter, only the following values are supported [json, rust]",
            other
        ))),
    }
}
