//! In-memory [`ElectionTransport`] that records what would have been sent.

use std::sync::Arc;

use parking_lot::Mutex;
use witness_crypto::generate_keypair;
use witness_protocol::Message;
use witness_types::{KeyPair, Timestamp};

use crate::wire::{election_message, ElectionTransport};

#[derive(Clone, Debug)]
pub(crate) struct Sent {
    pub subtype: String,
    pub payload: Vec<u8>,
    pub expiration: Timestamp,
}

pub(crate) struct RecordingTransport {
    pub name: String,
    pub keypair: KeyPair,
    sent: Mutex<Vec<Sent>>,
}

impl RecordingTransport {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            keypair: generate_keypair(),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Rebuild what a peer would have received for each recorded frame.
    pub fn take_messages(&self) -> Vec<Message> {
        self.take()
            .into_iter()
            .map(|s| election_message(&s.subtype, s.payload, s.expiration).sign(&self.name, &self.keypair))
            .collect()
    }
}

impl ElectionTransport for RecordingTransport {
    fn actor_name(&self) -> &str {
        &self.name
    }

    fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    fn broadcast(&self, subtype: &str, payload: Vec<u8>, expiration: Timestamp) -> usize {
        self.sent.lock().push(Sent {
            subtype: subtype.to_owned(),
            payload,
            expiration,
        });
        0
    }
}
