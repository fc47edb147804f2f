#![allow(clippy::needless_doctest_main)]
//! `standin` is a programmable HTTP test double: a server that stands in for the third-party
//! APIs your application talks to, answering requests according to the expectations you give it.
//!
//! # Table of Contents
//! 1. [Getting started](#getting-started)
//! 2. [Expectations](#expectations)
//! 3. [Actions](#actions)
//! 4. [Control plane](#control-plane)
//! 5. [Verification](#verification)
//! 6. [Runtime compatibility](#runtime-compatibility)
//!
//! ## Getting started
//! ```rust
//! use standin::{Expectation, MockServer, ResponseTemplate};
//! use standin::matchers::request;
//!
//! #[async_std::main]
//! async fn main() {
//!     // Start a background HTTP server on a random local port
//!     let mock_server = MockServer::start().await;
//!
//!     // Arrange the behaviour of the MockServer adding an Expectation:
//!     // when it receives a GET request on '/hello' it will respond with a 200.
//!     Expectation::when(request().method("GET").path("/hello"))
//!         .then_respond(ResponseTemplate::new(200))
//!         // Mounting the expectation on the mock server - it's now effective!
//!         .mount(&mock_server)
//!         .await;
//!
//!     // If we probe the MockServer using any HTTP client it behaves as expected.
//!     let status = reqwest::get(format!("{}/hello", &mock_server.uri()))
//!         .await
//!         .unwrap()
//!         .status();
//!     assert_eq!(status.as_u16(), 200);
//!
//!     // If the request doesn't match any expectation a 404 is returned.
//!     let status = reqwest::get(format!("{}/missing", &mock_server.uri()))
//!         .await
//!         .unwrap()
//!         .status();
//!     assert_eq!(status.as_u16(), 404);
//! }
//! ```
//!
//! ## Expectations
//!
//! An [`Expectation`] pairs a [`RequestPattern`](matchers::RequestPattern) with an action.
//! Expectations are matched in registration order: the first registered one wins.
//!
//! An expectation can be limited in the number of requests it serves, with [`Times`], and in
//! how long it stays active, with [`TimeToLive`]. Once exhausted or expired it is dropped.
//!
//! Registering an unlimited expectation for a pattern that already has one caps the older
//! expectation to a single further match (see [`MockServerBuilder::overlap_cap`]):
//! re-registering a pattern eventually replaces its response.
//!
//! ## Actions
//!
//! A matched expectation can:
//! - respond with a [`ResponseTemplate`];
//! - forward the request to another server, with [`HttpForward`];
//! - write raw bytes on the socket and/or drop the connection, with [`HttpError`];
//! - build the response with an in-process callback registered with
//!   [`MockServer::register_callback`], with [`HttpClassCallback`];
//! - hand the request over to a [`CallbackClient`] and wait for its answer, with
//!   [`HttpObjectCallback`].
//!
//! ## Control plane
//!
//! The server is also driven over HTTP, with `PUT` requests carrying JSON bodies:
//! `/expectation`, `/clear`, `/reset`, `/retrieve`, `/verify`, `/verifySequence`,
//! `/dumpToLog`, `/status`, `/bind` and `/stop`.
//! Any other request goes through expectation matching.
//!
//! ## Verification
//!
//! Every request served outside of the control plane is recorded. Use [`MockServer::verify`]
//! and [`MockServer::verify_sequence`] (or `PUT /verify` and `PUT /verifySequence`) to check
//! what your application sent.
//!
//! ## Runtime compatibility
//!
//! The server runs on its own thread, with its own `tokio` runtime: `standin` can be used
//! (and it is tested to work) from [`async_std`], [`tokio`] and `actix-rt` tests alike.
//!
//! [`async_std`]: https://docs.rs/async-std/
//! [`tokio`]: https://docs.rs/tokio/
mod action;
mod callback_registry;
mod dispatcher;
mod error;
mod expectation;
mod expectation_registry;
mod handler;
pub mod http;
pub mod matchers;
mod mock_server;
mod request;
mod request_log;
mod respond;
mod response_template;
mod response_writer;
mod serialization;
mod verification;

pub use action::{
    Action, ActionSet, HttpClassCallback, HttpError, HttpForward, HttpObjectCallback, Scheme,
};
pub use callback_registry::{CallbackClient, CallbackRequest};
pub use dispatcher::{Forward, HyperForwarder};
pub use error::{CallbackError, DispatchError, Error};
pub use expectation::{
    Expectation, ExpectationBuilder, ExpectationId, ExpectationState, TimeToLive, Times,
};
pub use expectation_registry::{ClearMode, ExpectationRegistry};
pub use mock_server::{MockServer, MockServerBuilder};
pub use request::{BodyPrintLimit, Request};
pub use request_log::LogEntry;
pub use respond::Respond;
pub use response_template::{ConnectionOptions, ResponseTemplate};
pub use verification::{Verification, VerificationFailure, VerificationSequence, VerificationTimes};
