use hyper::body::Bytes;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::Notify;

/// Raw bytes to write on a connection once `hyper` has been stepped aside.
#[derive(Debug)]
pub(super) struct Takeover {
    pub(super) bytes: Option<Vec<u8>>,
    pub(super) drop_connection: bool,
}

/// Lets a request handler steer the connection it is being served on.
#[derive(Debug, Default)]
pub(super) struct ConnectionControl {
    read_closed: AtomicBool,
    takeover: Mutex<Option<Takeover>>,
    notify: Notify,
}

impl ConnectionControl {
    /// Stop reading from the socket: `hyper` finishes writing the current response, sees the
    /// end of the stream and closes the connection.
    pub(super) fn close_after_response(&self) {
        self.read_closed.store(true, Ordering::Release);
    }

    fn is_read_closed(&self) -> bool {
        self.read_closed.load(Ordering::Acquire)
    }

    pub(super) fn request_takeover(&self, takeover: Takeover) {
        *self.takeover.lock().unwrap_or_else(PoisonError::into_inner) = Some(takeover);
        self.notify.notify_one();
    }

    pub(super) async fn takeover_requested(&self) -> Takeover {
        loop {
            if let Some(takeover) = self
                .takeover
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                return takeover;
            }
            self.notify.notified().await;
        }
    }
}

/// A `TcpStream` that can be closed for reading from the outside, and that replays
/// the bytes `hyper` had already buffered when the connection is handed back to it.
#[derive(Debug)]
pub(super) struct ControlledIo {
    stream: TcpStream,
    rewind: Option<Bytes>,
    control: std::sync::Arc<ConnectionControl>,
}

impl ControlledIo {
    pub(super) fn new(stream: TcpStream, control: std::sync::Arc<ConnectionControl>) -> Self {
        Self {
            stream,
            rewind: None,
            control,
        }
    }

    pub(super) fn rewind(&mut self, buffered: Bytes) {
        if !buffered.is_empty() {
            self.rewind = Some(buffered);
        }
    }
}

impl AsyncRead for ControlledIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.control.is_read_closed() {
            return Poll::Ready(Ok(()));
        }
        if let Some(mut prefix) = self.rewind.take() {
            let n = prefix.len().min(buf.remaining());
            buf.put_slice(&prefix.split_to(n));
            if !prefix.is_empty() {
                self.rewind = Some(prefix);
            }
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for ControlledIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn pair() -> (ControlledIo, TcpStream, Arc<ConnectionControl>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let control = Arc::new(ConnectionControl::default());
        (ControlledIo::new(server, control.clone()), client, control)
    }

    #[tokio::test]
    async fn rewound_bytes_are_read_before_the_socket() {
        let (mut io, mut client, _control) = pair().await;
        io.rewind(Bytes::from_static(b"GET "));
        client.write_all(b"/ HTTP/1.1").await.unwrap();

        let mut read = vec![0; 14];
        io.read_exact(&mut read).await.unwrap();

        assert_eq!(read, b"GET / HTTP/1.1");
    }

    #[tokio::test]
    async fn closed_connections_read_as_end_of_stream() {
        let (mut io, mut client, control) = pair().await;
        client.write_all(b"pending").await.unwrap();

        control.close_after_response();

        let mut read = Vec::new();
        assert_eq!(io.read_to_end(&mut read).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn takeovers_requested_before_waiting_are_not_lost() {
        let control = ConnectionControl::default();

        control.request_takeover(Takeover {
            bytes: Some(b"raw".to_vec()),
            drop_connection: true,
        });
        let takeover = control.takeover_requested().await;

        assert_eq!(takeover.bytes.as_deref(), Some(&b"raw"[..]));
        assert!(takeover.drop_connection);
    }
}
