//! Remote callback clients: requests matched by an [`HttpObjectCallback`] expectation are
//! pushed to a client, which answers out-of-band; the answer is then written on the
//! connection the request arrived on.
//!
//! [`HttpObjectCallback`]: crate::HttpObjectCallback
use crate::error::{CallbackError, DispatchError};
use crate::{Request, ResponseTemplate};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};

/// A request handed over to a [`CallbackClient`].
///
/// Answer it with [`CallbackClient::respond`], passing back its `correlation_id`.
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    pub correlation_id: u64,
    pub request: Request,
}

struct ClientSlot {
    generation: u64,
    sender: mpsc::UnboundedSender<CallbackRequest>,
}

struct PendingSlot {
    client_id: String,
    generation: u64,
    sender: oneshot::Sender<ResponseTemplate>,
}

#[derive(Default)]
struct Inner {
    clients: Mutex<HashMap<String, ClientSlot>>,
    pending: Mutex<HashMap<u64, PendingSlot>>,
    sequence: AtomicU64,
}

impl Inner {
    fn clients(&self) -> MutexGuard<'_, HashMap<String, ClientSlot>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, PendingSlot>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }
}

/// Correlates the responses delivered by callback clients with the requests waiting for them.
#[derive(Clone, Default)]
pub(crate) struct CallbackClientRegistry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CallbackClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackClientRegistry")
            .field("clients", &self.inner.clients().keys().collect::<Vec<_>>())
            .field("pending", &self.inner.pending().len())
            .finish()
    }
}

impl CallbackClientRegistry {
    /// Attach a client under `client_id`. A client already attached under the same id is
    /// detached: its request stream ends.
    pub(crate) fn register_client(&self, client_id: String) -> CallbackClient {
        let (sender, receiver) = mpsc::unbounded_channel();
        let generation = self.inner.next();
        let previous = self
            .inner
            .clients()
            .insert(client_id.clone(), ClientSlot { generation, sender });
        if previous.is_some() {
            debug!("Callback client `{}` replaced a previous connection.", client_id);
        }
        CallbackClient {
            client_id,
            generation,
            receiver,
            registry: self.clone(),
        }
    }

    /// Push `request` to the client attached under `client_id` and return a handle to await
    /// its answer.
    pub(crate) fn send(
        &self,
        client_id: &str,
        request: Request,
    ) -> Result<PendingResponse, DispatchError> {
        let clients = self.inner.clients();
        let client = clients
            .get(client_id)
            .ok_or_else(|| DispatchError::CallbackClientNotConnected(client_id.to_string()))?;

        let correlation_id = self.inner.next();
        let (sender, receiver) = oneshot::channel();
        self.inner.pending().insert(
            correlation_id,
            PendingSlot {
                client_id: client_id.to_string(),
                generation: client.generation,
                sender,
            },
        );
        // Dropped from here on, the guard cleans up the pending slot.
        let pending = PendingResponse {
            client_id: client_id.to_string(),
            correlation_id,
            receiver,
            registry: self.clone(),
        };

        client
            .sender
            .send(CallbackRequest {
                correlation_id,
                request,
            })
            .map_err(|_| DispatchError::CallbackClientDisconnected(client_id.to_string()))?;
        Ok(pending)
    }

    /// Complete the request waiting on `correlation_id`. Each request is completed at most
    /// once: later deliveries are rejected without side effects.
    pub(crate) fn deliver(
        &self,
        client_id: &str,
        correlation_id: u64,
        response: ResponseTemplate,
    ) -> Result<(), CallbackError> {
        let no_pending_request = || CallbackError::NoPendingRequest {
            client_id: client_id.to_string(),
            correlation_id,
        };

        let slot = {
            let mut pending = self.inner.pending();
            let issued_to_client = pending
                .get(&correlation_id)
                .map_or(false, |slot| slot.client_id == client_id);
            if issued_to_client {
                pending.remove(&correlation_id)
            } else {
                None
            }
        };
        let outcome = match slot {
            // The receiver is gone if the connection dropped in the meantime.
            Some(slot) => slot.sender.send(response).map_err(|_| no_pending_request()),
            None => Err(no_pending_request()),
        };
        if let Err(e) = &outcome {
            warn!("Discarding callback response: {}", e);
        }
        outcome
    }

    pub(crate) fn is_connected(&self, client_id: &str) -> bool {
        self.inner.clients().contains_key(client_id)
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    fn detach(&self, client_id: &str, generation: u64) {
        {
            let mut clients = self.inner.clients();
            if clients
                .get(client_id)
                .map_or(false, |slot| slot.generation == generation)
            {
                clients.remove(client_id);
            }
        }
        // Dropping the senders wakes up every request still waiting on this client.
        let mut pending = self.inner.pending();
        let before = pending.len();
        pending.retain(|_, slot| !(slot.client_id == client_id && slot.generation == generation));
        let failed = before - pending.len();
        if failed > 0 {
            debug!(
                "Callback client `{}` detached with {} request(s) pending.",
                client_id, failed
            );
        }
    }
}

/// A request suspended until its callback client answers.
pub(crate) struct PendingResponse {
    client_id: String,
    correlation_id: u64,
    receiver: oneshot::Receiver<ResponseTemplate>,
    registry: CallbackClientRegistry,
}

impl PendingResponse {
    pub(crate) async fn wait(mut self) -> Result<ResponseTemplate, DispatchError> {
        (&mut self.receiver)
            .await
            .map_err(|_| DispatchError::CallbackClientDisconnected(self.client_id.clone()))
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.registry.inner.pending().remove(&self.correlation_id);
    }
}

/// The in-process end of a callback client's channel, obtained with
/// [`MockServer::callback_client`].
///
/// Requests matched by an [`HttpObjectCallback`] expectation naming this client show up in
/// [`next_request`]; they stay suspended until answered with [`respond`].
/// Dropping the client fails every request still waiting on it.
///
/// [`MockServer::callback_client`]: crate::MockServer::callback_client
/// [`HttpObjectCallback`]: crate::HttpObjectCallback
/// [`next_request`]: CallbackClient::next_request
/// [`respond`]: CallbackClient::respond
pub struct CallbackClient {
    client_id: String,
    generation: u64,
    receiver: mpsc::UnboundedReceiver<CallbackRequest>,
    registry: CallbackClientRegistry,
}

impl CallbackClient {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Wait for the next request routed to this client.
    ///
    /// Returns `None` once the client has been replaced by another one registered under the
    /// same id, or the server has shut down.
    pub async fn next_request(&mut self) -> Option<CallbackRequest> {
        self.receiver.recv().await
    }

    /// Answer the request identified by `correlation_id`.
    pub fn respond(
        &self,
        correlation_id: u64,
        response: ResponseTemplate,
    ) -> Result<(), CallbackError> {
        self.registry
            .deliver(&self.client_id, correlation_id, response)
    }
}

impl std::fmt::Debug for CallbackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackClient")
            .field("client_id", &self.client_id)
            .finish()
    }
}

impl Drop for CallbackClient {
    fn drop(&mut self) {
        self.registry.detach(&self.client_id, self.generation);
    }
}
