//! Connection pool: the set of live, identity-deduplicated connections.
//!
//! Holds at most one authenticated connection per peer identity. A second
//! connection for an identity already present is refused, never swapped in.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use witness_protocol::{codec, Message};
use witness_types::Identity;

use crate::connection::Connection;

/// Shared handle to the pool; clones refer to the same set.
#[derive(Clone, Default)]
pub struct ConnectionPool {
    connections: Arc<Mutex<HashMap<Identity, Arc<Connection>>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `connection`. Returns `false` if its identity is already present.
    pub fn add(&self, connection: Arc<Connection>) -> bool {
        let mut connections = self.connections.lock();
        match connections.entry(*connection.peer()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(connection);
                true
            }
        }
    }

    /// Remove `connection` if it is the one registered for its identity.
    ///
    /// A refused duplicate tearing down never evicts the original.
    pub fn remove(&self, connection: &Connection) -> bool {
        let mut connections = self.connections.lock();
        match connections.get(connection.peer()) {
            Some(current) if current.id() == connection.id() => {
                connections.remove(connection.peer());
                true
            }
            _ => false,
        }
    }

    pub fn find(&self, identity: &Identity) -> Option<Arc<Connection>> {
        self.connections.lock().get(identity).cloned()
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.connections.lock().contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    pub fn identities(&self) -> Vec<Identity> {
        self.connections.lock().keys().copied().collect()
    }

    /// Queue `frame` on every connection except the one to `excluded`.
    ///
    /// Returns the number of connections the frame was queued for.
    pub fn broadcast_except(&self, excluded: &Identity, frame: Arc<[u8]>) -> usize {
        let targets: Vec<Arc<Connection>> = self
            .connections
            .lock()
            .values()
            .filter(|c| c.peer() != excluded)
            .cloned()
            .collect();
        targets
            .iter()
            .filter(|c| c.send_frame(Arc::clone(&frame)))
            .count()
    }

    /// Route a message.
    ///
    /// - sender == receiver: dropped, there is no self-delivery.
    /// - receiver set: only that peer, silently dropped if not connected.
    /// - receiver unset: every connection except the sender's.
    ///
    /// Returns the number of connections the message was queued for.
    pub fn send(&self, message: &Message) -> usize {
        let sender = message.sender.identity();
        if message.receiver.as_ref() == Some(sender) {
            return 0;
        }
        let frame: Arc<[u8]> = match codec::encode_frame(message) {
            Ok(bytes) => Arc::from(bytes),
            Err(e) => {
                tracing::warn!(error = %e, "cannot encode outbound message");
                return 0;
            }
        };
        match &message.receiver {
            Some(receiver) => match self.find(receiver) {
                Some(connection) => usize::from(connection.send_frame(frame)),
                None => {
                    tracing::debug!(receiver = %receiver, "receiver not connected, message dropped");
                    0
                }
            },
            None => self.broadcast_except(sender, frame),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Direction;
    use std::net::SocketAddr;
    use tokio::sync::mpsc;
    use witness_crypto::generate_keypair;
    use witness_types::KeyPair;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:7100".parse().unwrap()
    }

    fn connection_to(peer: Identity) -> (Arc<Connection>, mpsc::Receiver<Arc<[u8]>>) {
        let (tx, rx) = mpsc::channel(8);
        let conn = Arc::new(Connection::new(peer, test_addr(), Direction::Outbound, tx));
        (conn, rx)
    }

    fn message_from(kp: &KeyPair, receiver: Option<Identity>) -> Message {
        let builder = Message::builder("test").payload(b"body".to_vec());
        let builder = match receiver {
            Some(r) => builder.receiver(r),
            None => builder,
        };
        builder.sign("sender", kp)
    }

    #[test]
    fn second_connection_for_identity_is_refused() {
        let pool = ConnectionPool::new();
        let peer = generate_keypair().identity;
        let (first, _rx1) = connection_to(peer);
        let (second, _rx2) = connection_to(peer);

        assert!(pool.add(Arc::clone(&first)));
        assert!(!pool.add(Arc::clone(&second)));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.find(&peer).unwrap().id(), first.id());
    }

    #[test]
    fn removing_refused_duplicate_keeps_original() {
        let pool = ConnectionPool::new();
        let peer = generate_keypair().identity;
        let (first, _rx1) = connection_to(peer);
        let (second, _rx2) = connection_to(peer);
        pool.add(Arc::clone(&first));
        pool.add(Arc::clone(&second));

        assert!(!pool.remove(&second));
        assert!(pool.contains(&peer));
        assert!(pool.remove(&first));
        assert!(pool.is_empty());
    }

    #[test]
    fn broadcast_skips_the_sender() {
        let pool = ConnectionPool::new();
        let sender = generate_keypair();
        let other = generate_keypair().identity;
        let (to_sender, mut rx_sender) = connection_to(sender.identity);
        let (to_other, mut rx_other) = connection_to(other);
        pool.add(to_sender);
        pool.add(to_other);

        assert_eq!(pool.send(&message_from(&sender, None)), 1);
        assert!(rx_other.try_recv().is_ok());
        assert!(rx_sender.try_recv().is_err());
    }

    #[test]
    fn targeted_message_reaches_only_receiver() {
        let pool = ConnectionPool::new();
        let sender = generate_keypair();
        let a = generate_keypair().identity;
        let b = generate_keypair().identity;
        let (to_a, mut rx_a) = connection_to(a);
        let (to_b, mut rx_b) = connection_to(b);
        pool.add(to_a);
        pool.add(to_b);

        assert_eq!(pool.send(&message_from(&sender, Some(b))), 1);
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn targeted_message_to_absent_peer_is_dropped() {
        let pool = ConnectionPool::new();
        let sender = generate_keypair();
        let (to_a, mut rx_a) = connection_to(generate_keypair().identity);
        pool.add(to_a);

        let absent = generate_keypair().identity;
        assert_eq!(pool.send(&message_from(&sender, Some(absent))), 0);
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn message_to_self_is_dropped() {
        let pool = ConnectionPool::new();
        let sender = generate_keypair();
        let (to_sender, mut rx) = connection_to(sender.identity);
        pool.add(to_sender);

        assert_eq!(pool.send(&message_from(&sender, Some(sender.identity))), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn queued_frame_decodes_to_the_message() {
        let pool = ConnectionPool::new();
        let sender = generate_keypair();
        let (to_a, mut rx) = connection_to(generate_keypair().identity);
        pool.add(to_a);

        let msg = message_from(&sender, None);
        pool.send(&msg);
        let frame = rx.try_recv().unwrap();
        let (decoded, _) = codec::decode_framed::<Message>(&frame).unwrap();
        assert_eq!(decoded, msg);
    }
}
