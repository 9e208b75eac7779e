use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::buffer::SpanBuffer;
use crate::cell::SubscriptionCell;
use crate::gateway::{ConnectionQueue, SpanSource};
use crate::selector::ActiveClientSelector;

pub type ClientId = u64;

/// Currently registered clients keyed by id
pub type ClientSet<T> = BTreeMap<ClientId, Client<T>>;

/// An admitted connection with its span buffer
pub struct Client<T> {
    id: ClientId,
    spans: Arc<SpanBuffer<T>>,
}

impl<T> Client<T> {
    fn new(id: ClientId, capacity: usize) -> Self {
        Self {
            id,
            spans: Arc::new(SpanBuffer::new(capacity)),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn spans(&self) -> &SpanBuffer<T> {
        &self.spans
    }
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            spans: Arc::clone(&self.spans),
        }
    }
}

impl<T> PartialEq for Client<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Client<T> {}

impl<T> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("spans", &self.spans)
            .finish()
    }
}

/// Registration of a client in the [`ClientSet`]
///
/// Dropping the guard releases the client in reverse acquisition order: it leaves
/// the set (clearing the active slot if it held this client) and then its buffer
/// is shut down. Release runs on every exit path, including task abort.
pub struct Membership<T> {
    client: Client<T>,
    clients: Arc<SubscriptionCell<ClientSet<T>>>,
    selector: Arc<ActiveClientSelector<T>>,
}

impl<T> Membership<T> {
    pub fn client(&self) -> &Client<T> {
        &self.client
    }
}

impl<T> Drop for Membership<T> {
    fn drop(&mut self) {
        let id = self.client.id;
        let selector = &self.selector;
        self.clients.update_if(|set| {
            let removed = set.remove(&id).is_some();
            if removed {
                selector.on_remove(id);
            }
            removed
        });
        self.client.spans.shutdown();
        tracing::info!("Client {} removed. Remaining: {}", id, self.clients.with(|set| set.len()));
    }
}

/// Admits connections, assigns ids and owns the [`ClientSet`]
pub struct ClientRegistry<T> {
    clients: Arc<SubscriptionCell<ClientSet<T>>>,
    selector: Arc<ActiveClientSelector<T>>,
    next_id: AtomicU64,
    buffer_capacity: usize,
}

impl<T> ClientRegistry<T>
where
    T: Send + Sync + 'static,
{
    /// Create an empty registry whose clients buffer up to `buffer_capacity` spans
    pub fn new(buffer_capacity: usize) -> Self {
        let clients = Arc::new(SubscriptionCell::new(ClientSet::new()));
        let selector = Arc::new(ActiveClientSelector::new(Arc::clone(&clients)));

        Self {
            clients,
            selector,
            next_id: AtomicU64::new(1),
            buffer_capacity,
        }
    }

    /// Reactive handle on the current membership
    pub fn clients(&self) -> &SubscriptionCell<ClientSet<T>> {
        &self.clients
    }

    pub fn selector(&self) -> &Arc<ActiveClientSelector<T>> {
        &self.selector
    }

    pub fn client(&self, id: ClientId) -> Option<Client<T>> {
        self.clients.with(|set| set.get(&id).cloned())
    }

    pub fn client_count(&self) -> usize {
        self.clients.with(|set| set.len())
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Register a new client and notify the selector.
    ///
    /// The client stays registered for as long as the returned guard lives.
    pub fn admit(&self) -> Membership<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let client = Client::new(id, self.buffer_capacity);

        let mut total = 0;
        self.clients.update(|set| {
            set.insert(id, client.clone());
            total = set.len();
        });
        self.selector.on_admit(&client);

        tracing::info!("Client {} added. Total: {}", id, total);

        Membership {
            client,
            clients: Arc::clone(&self.clients),
            selector: Arc::clone(&self.selector),
        }
    }

    /// Admit every connection delivered by `queue`, forwarding each on its own task.
    ///
    /// Never returns. Forwarding tasks are spawned into `forwarders` so the caller can
    /// shut them all down; finished ones are reaped here.
    pub async fn intake<S>(&self, queue: &ConnectionQueue<S>, forwarders: &mut JoinSet<ClientId>)
    where
        S: SpanSource<Span = T>,
    {
        loop {
            tokio::select! {
                source = queue.take() => match source {
                    Some(source) => {
                        let membership = self.admit();
                        forwarders.spawn(forward(membership, source));
                    }
                    None => {
                        tracing::warn!("Connection queue closed, no further clients will be admitted");
                        std::future::pending::<()>().await;
                    }
                },
                Some(joined) = forwarders.join_next(), if !forwarders.is_empty() => match joined {
                    Ok(id) => tracing::debug!("Forwarding task for client {} finished", id),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => tracing::error!("Forwarding task failed: {}", e),
                },
            }
        }
    }
}

/// Pull spans from `source` into the client's buffer until the connection ends
async fn forward<T, S>(membership: Membership<T>, mut source: S) -> ClientId
where
    S: SpanSource<Span = T>,
{
    let client = membership.client();
    let id = client.id();

    loop {
        match source.next_span().await {
            Ok(Some(span)) => {
                client.spans().offer(span);
            }
            Ok(None) => {
                tracing::info!("Client {} disconnected", id);
                break;
            }
            Err(e) => {
                tracing::warn!("Client {} connection terminated: {}", id, e);
                break;
            }
        }
    }

    drop(membership);
    id
}
