//! All bits and pieces concerning the HTTP mock server are in this module.
//!
//! `bare_server::BareMockServer` owns the background thread running the `hyper` HTTP server
//! defined in the `hyper` sub-module, which hands every request over to the shared
//! [`MockServerHandler`](crate::handler::MockServerHandler).
//!
//! `bare_server::BareMockServer` is not exposed directly: crate users only get to interact with
//! `exposed_server::MockServer`, a thin wrapper adding the user-facing API.
mod bare_server;
mod builder;
mod connection;
mod exposed_server;
mod hyper;
pub(crate) mod ports;

pub use builder::MockServerBuilder;
pub use exposed_server::MockServer;
