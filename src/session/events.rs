//! Identity-provider events and the in-process subscription hub.

use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::debug;

/// A signed-in identity as reported by the provider.
#[derive(Clone, Debug)]
pub struct Identity {
    pub uid: String,
    pub token: SecretString,
}

impl Identity {
    #[must_use]
    pub fn new(uid: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            token: SecretString::from(token.into()),
        }
    }
}

#[derive(Clone, Debug)]
pub enum AuthEvent {
    SignedIn(Identity),
    SignedOut,
}

/// Anything that can hand out subscriptions to [`AuthEvent`]s.
pub trait AuthEventSource: Send + Sync {
    fn subscribe(&self) -> AuthSubscription;
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    senders: HashMap<u64, mpsc::UnboundedSender<AuthEvent>>,
}

/// Fan-out of provider events to every live subscription.
#[derive(Clone, Default)]
pub struct AuthEventHub {
    listeners: Arc<Mutex<Listeners>>,
}

impl AuthEventHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event; returns how many subscriptions received it.
    pub fn publish(&self, event: &AuthEvent) -> usize {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        listeners
            .senders
            .retain(|_, sender| sender.send(event.clone()).is_ok());
        listeners.senders.len()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .senders
            .len()
    }
}

impl AuthEventSource for AuthEventHub {
    fn subscribe(&self) -> AuthSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = listeners.next_id;
        listeners.next_id = listeners.next_id.wrapping_add(1);
        listeners.senders.insert(id, sender);
        debug!(subscription = id, "auth subscription registered");

        AuthSubscription {
            id,
            receiver,
            listeners: Arc::downgrade(&self.listeners),
        }
    }
}

/// A live registration with an [`AuthEventHub`].
///
/// Dropping the subscription removes it from the hub before the drop returns,
/// so no event is routed to it afterwards.
pub struct AuthSubscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<AuthEvent>,
    listeners: Weak<Mutex<Listeners>>,
}

impl AuthSubscription {
    /// Wait for the next event. `None` once the hub is gone and the backlog
    /// is drained.
    pub async fn next(&mut self) -> Option<AuthEvent> {
        self.receiver.recv().await
    }

    /// Release the subscription now.
    pub fn cancel(self) {}
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .senders
                .remove(&self.id);
            debug!(subscription = self.id, "auth subscription released");
        }
    }
}
