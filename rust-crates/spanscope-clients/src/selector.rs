use std::sync::Arc;

use tokio::sync::watch;

use crate::cell::SubscriptionCell;
use crate::client::{Client, ClientId, ClientSet};

/// Single-slot store naming the client whose spans are surfaced to the UI
///
/// The active client, when present, is always a member of the registry's
/// [`ClientSet`]. Selection reads the set while holding it, and removal clears
/// the slot while still holding the set, so the two can never interleave.
pub struct ActiveClientSelector<T> {
    clients: Arc<SubscriptionCell<ClientSet<T>>>,
    active: SubscriptionCell<Option<Client<T>>>,
}

impl<T> ActiveClientSelector<T> {
    pub(crate) fn new(clients: Arc<SubscriptionCell<ClientSet<T>>>) -> Self {
        Self {
            clients,
            active: SubscriptionCell::new(None),
        }
    }

    /// Make `id` the active client.
    ///
    /// Returns `false` without touching the slot when no such client is registered;
    /// a selection racing a disconnect is expected.
    pub fn select(&self, id: ClientId) -> bool {
        let selected = self.clients.with(|set| match set.get(&id) {
            Some(client) => {
                self.active.set(Some(client.clone()));
                true
            }
            None => false,
        });

        if selected {
            tracing::info!("Client {} selected", id);
        } else {
            tracing::debug!("Ignoring selection of unknown client {}", id);
        }
        selected
    }

    pub fn active(&self) -> Option<Client<T>> {
        self.active.get()
    }

    pub fn active_id(&self) -> Option<ClientId> {
        self.active.with(|active| active.as_ref().map(Client::id))
    }

    /// Changes of the active slot
    pub fn subscribe(&self) -> watch::Receiver<Option<Client<T>>> {
        self.active.subscribe()
    }

    /// A newly admitted client becomes active only if nothing is active yet
    pub(crate) fn on_admit(&self, client: &Client<T>) -> bool {
        self.active.update_if(|active| {
            if active.is_some() {
                return false;
            }
            *active = Some(client.clone());
            true
        })
    }

    /// Clear the slot if it holds `id`. No other client is promoted.
    pub(crate) fn on_remove(&self, id: ClientId) -> bool {
        self.active.update_if(|active| match active {
            Some(client) if client.id() == id => {
                *active = None;
                true
            }
            _ => false,
        })
    }
}
