use crate::error::Error;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// The ports a mock server listens on, and the switch to stop listening on all of them.
#[derive(Debug)]
pub(crate) struct PortRegistry {
    host: IpAddr,
    addresses: Mutex<Vec<SocketAddr>>,
    shutdown: watch::Sender<bool>,
}

impl PortRegistry {
    pub(crate) fn new(address: SocketAddr) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            host: address.ip(),
            addresses: Mutex::new(vec![address]),
            shutdown,
        }
    }

    /// Every port the server listens on, the one it started with first.
    pub(crate) fn ports(&self) -> Vec<u16> {
        self.addresses().iter().map(|a| a.port()).collect()
    }

    /// Bind a listener for each requested port, `0` asking the OS for a free one.
    ///
    /// Either every port gets bound or none does.
    pub(crate) fn bind(&self, ports: &[u16]) -> Result<Vec<TcpListener>, Error> {
        let mut listeners = Vec::with_capacity(ports.len());
        for &port in ports {
            let listener = TcpListener::bind((self.host, port))
                .and_then(|listener| listener.set_nonblocking(true).map(|_| listener))
                .map_err(|source| Error::PortConflict { port, source })?;
            listeners.push(listener);
        }
        let mut addresses = self.addresses();
        for listener in &listeners {
            if let Ok(address) = listener.local_addr() {
                addresses.push(address);
            }
        }
        Ok(listeners)
    }

    pub(crate) fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    fn addresses(&self) -> MutexGuard<'_, Vec<SocketAddr>> {
        self.addresses.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolves once a stop has been requested, or once the registry is gone.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
