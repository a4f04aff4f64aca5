//! Facade over the pool that upper layers use to emit and subscribe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use witness_protocol::{Message, MessageBuilder};
use witness_types::{Identity, KeyPair};

use crate::connection::InboundHandler;
use crate::pool::ConnectionPool;

/// Callback invoked for each inbound message of a subscribed type.
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

type HandlerTable = HashMap<String, Vec<(u64, MessageHandler)>>;

struct MessengerInner {
    name: String,
    keypair: Arc<KeyPair>,
    pool: ConnectionPool,
    default_ttl: Duration,
    handlers: RwLock<HandlerTable>,
    next_subscription: AtomicU64,
}

/// Signs outgoing messages as this node and fans inbound messages out to
/// subscribers keyed by message type.
#[derive(Clone)]
pub struct Messenger {
    inner: Arc<MessengerInner>,
}

impl Messenger {
    pub fn new(
        name: impl Into<String>,
        keypair: Arc<KeyPair>,
        pool: ConnectionPool,
        default_ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(MessengerInner {
                name: name.into(),
                keypair,
                pool,
                default_ttl,
                handlers: RwLock::new(HashMap::new()),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    /// Actor name this node signs as.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn identity(&self) -> Identity {
        self.inner.keypair.identity
    }

    pub fn keypair(&self) -> &Arc<KeyPair> {
        &self.inner.keypair
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// Start a message of `message_type` with this node's default TTL.
    pub fn compose(&self, message_type: impl Into<String>) -> MessageBuilder {
        Message::builder(message_type).ttl(self.inner.default_ttl)
    }

    /// Sign `builder` as this node.
    pub fn sign(&self, builder: MessageBuilder) -> Message {
        builder.sign(&self.inner.name, &self.inner.keypair)
    }

    /// Route `message` through the pool. Returns the number of peers it was
    /// queued for.
    pub fn emit(&self, message: &Message) -> usize {
        let queued = self.inner.pool.send(message);
        tracing::trace!(
            message_type = message.message_type().unwrap_or("-"),
            queued,
            "emitted message"
        );
        queued
    }

    /// Register `handler` for inbound messages of `message_type`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// dropped or disposed.
    pub fn subscribe<F>(&self, message_type: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let message_type = message_type.into();
        let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .entry(message_type.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            messenger: Arc::downgrade(&self.inner),
            message_type,
            id,
        }
    }

    /// Hand `message` to every handler of its type, outside the table lock.
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, message: &Message) -> usize {
        let Some(message_type) = message.message_type() else {
            return 0;
        };
        let handlers: Vec<MessageHandler> = match self.inner.handlers.read().get(message_type) {
            Some(entries) => entries.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };
        for handler in &handlers {
            handler(message);
        }
        handlers.len()
    }

    pub fn handler_count(&self, message_type: &str) -> usize {
        self.inner
            .handlers
            .read()
            .get(message_type)
            .map_or(0, Vec::len)
    }
}

impl InboundHandler for Messenger {
    fn on_message(&self, peer: &Identity, message: Message) {
        if self.dispatch(&message) == 0 {
            tracing::trace!(
                peer = %peer,
                message_type = message.message_type().unwrap_or("-"),
                "no subscriber for message"
            );
        }
    }
}

/// Keeps a handler registered; unregisters it on drop.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    messenger: Weak<MessengerInner>,
    message_type: String,
    id: u64,
}

impl Subscription {
    /// Unregister now rather than at drop.
    pub fn dispose(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.messenger.upgrade() else {
            return;
        };
        let mut handlers = inner.handlers.write();
        if let Some(entries) = handlers.get_mut(&self.message_type) {
            entries.retain(|(id, _)| *id != self.id);
            if entries.is_empty() {
                handlers.remove(&self.message_type);
            }
        }
    }
}
