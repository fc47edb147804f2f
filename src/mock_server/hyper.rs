use crate::handler::{MockServerHandler, Outcome};
use crate::mock_server::connection::{ConnectionControl, ControlledIo, Takeover};
use crate::mock_server::ports::stopped;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Response;
use hyper_util::rt::TokioIo;
use log::{debug, warn};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<Full<Bytes>>, hyper::Error>>>>;

/// What every listener and connection of a server shares.
///
/// Each clone holds on to the `_drain` sender: the server knows that all of them are done
/// once the matching receiver reports the channel as closed.
#[derive(Clone)]
pub(super) struct ServerContext {
    pub(super) handler: Arc<MockServerHandler>,
    pub(super) _drain: mpsc::Sender<()>,
}

/// Accept connections on `listener` until the server is stopped.
///
/// Must run within a `LocalSet`: connections are spawned with `spawn_local`.
pub(super) async fn run_listener(listener: std::net::TcpListener, context: ServerContext) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            warn!("Failed to start listening: {}", e);
            return;
        }
    };
    let mut shutdown = context.handler.ports().shutdown_signal();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    tokio::task::spawn_local(serve_connection(stream, context.clone()));
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            },
            _ = stopped(&mut shutdown) => break,
        }
    }
}

/// Serve HTTP/1.1 on `stream`, stepping `hyper` aside whenever raw bytes must be written.
async fn serve_connection(stream: TcpStream, context: ServerContext) {
    let control = Arc::new(ConnectionControl::default());
    let mut shutdown = context.handler.ports().shutdown_signal();
    let mut io = ControlledIo::new(stream, control.clone());

    loop {
        let service = {
            let context = context.clone();
            let control = control.clone();
            service_fn(move |request| -> ServiceFuture {
                Box::pin(respond(context.clone(), control.clone(), request))
            })
        };
        let mut connection = http1::Builder::new()
            // The read side is closed by hand to end a connection after a response.
            .half_close(true)
            .serve_connection(TokioIo::new(io), service);

        let takeover = tokio::select! {
            served = futures::future::poll_fn(|cx| connection.poll_without_shutdown(cx)) => {
                match served {
                    Ok(()) => {
                        let mut io = connection.into_parts().io.into_inner();
                        let _ = io.shutdown().await;
                    }
                    Err(e) => log_connection_error(e),
                }
                return;
            }
            takeover = control.takeover_requested() => takeover,
            _ = stopped(&mut shutdown) => {
                Pin::new(&mut connection).graceful_shutdown();
                if let Err(e) = connection.await {
                    log_connection_error(e);
                }
                return;
            }
        };

        let parts = connection.into_parts();
        io = parts.io.into_inner();
        io.rewind(parts.read_buf);
        if let Err(e) = write_raw(&mut io, &takeover).await {
            debug!("Failed to write raw response: {}", e);
            return;
        }
        if takeover.drop_connection {
            let _ = io.shutdown().await;
            return;
        }
    }
}

async fn respond(
    context: ServerContext,
    control: Arc<ConnectionControl>,
    request: hyper::Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let request = crate::Request::from_hyper(request).await?;
    match context.handler.handle(request).await {
        Outcome::Respond(written) => {
            if written.close_socket {
                control.close_after_response();
            }
            Ok(written.response)
        }
        Outcome::Bind {
            response,
            listeners,
        } => {
            for listener in listeners {
                tokio::task::spawn_local(run_listener(listener, context.clone()));
            }
            if response.close_socket {
                control.close_after_response();
            }
            Ok(response.response)
        }
        Outcome::Raw {
            bytes,
            drop_connection,
        } => {
            control.request_takeover(Takeover {
                bytes,
                drop_connection,
            });
            // The connection loop drops this future when it takes the socket back.
            futures::future::pending().await
        }
    }
}

async fn write_raw(io: &mut ControlledIo, takeover: &Takeover) -> io::Result<()> {
    if let Some(bytes) = &takeover.bytes {
        io.write_all(bytes).await?;
        io.flush().await?;
    }
    Ok(())
}

fn log_connection_error(e: hyper::Error) {
    if e.is_incomplete_message() || e.is_canceled() || is_reset(&e) {
        debug!("Connection closed by peer: {}", e);
    } else {
        warn!("Error while serving connection: {}", e);
    }
}

fn is_reset(e: &hyper::Error) -> bool {
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        if let Some(e) = cause.downcast_ref::<io::Error>() {
            return matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            );
        }
        source = cause.source();
    }
    false
}
