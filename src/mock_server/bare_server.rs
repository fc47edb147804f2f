use crate::handler::MockServerHandler;
use crate::mock_server::hyper::{run_listener, ServerContext};
use crate::mock_server::ports::stopped;
use log::debug;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::LocalSet;

/// How long in-flight connections get to complete once the server is asked to stop.
const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// An HTTP web-server running in the background on its own thread.
///
/// `BareMockServer` is the actual mock server behind the publicly-exposed `MockServer`, which
/// adds the user-facing API on top of the shared [`MockServerHandler`].
pub(crate) struct BareMockServer {
    handler: Arc<MockServerHandler>,
    server_address: SocketAddr,
}

impl BareMockServer {
    /// Start serving `listener` with `handler` on a dedicated thread.
    ///
    /// The listener is already bound: connections made before the runtime is up wait in the
    /// accept backlog.
    pub(crate) fn start(listener: TcpListener, handler: Arc<MockServerHandler>) -> Self {
        let server_address = listener
            .local_addr()
            .expect("Failed to get server address.");
        listener
            .set_nonblocking(true)
            .expect("Failed to set the listener in non-blocking mode.");

        let server_handler = handler.clone();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("Cannot build local tokio runtime");

            LocalSet::new().block_on(&runtime, async move {
                let (drain, mut drained) = mpsc::channel::<()>(1);
                let mut shutdown = server_handler.ports().shutdown_signal();
                tokio::task::spawn_local(run_listener(
                    listener,
                    ServerContext {
                        handler: server_handler,
                        _drain: drain,
                    },
                ));

                stopped(&mut shutdown).await;
                debug!("Mock server on {} shutting down.", server_address);
                // Every listener and connection holds a sender: `recv` yields `None` once all
                // of them are gone.
                if tokio::time::timeout(GRACE_PERIOD, drained.recv())
                    .await
                    .is_err()
                {
                    debug!(
                        "Mock server on {} dropped connections still in flight.",
                        server_address
                    );
                }
            })
        });

        Self {
            handler,
            server_address,
        }
    }

    pub(crate) fn handler(&self) -> &MockServerHandler {
        &self.handler
    }

    /// Return the base uri of this running instance of `BareMockServer`, e.g. `http://127.0.0.1:4372`.
    pub(crate) fn uri(&self) -> String {
        format!("http://{}", self.server_address)
    }

    pub(crate) fn address(&self) -> &SocketAddr {
        &self.server_address
    }
}

impl Drop for BareMockServer {
    fn drop(&mut self) {
        self.handler.ports().stop();
    }
}
