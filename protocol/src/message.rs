//! The signed message envelope carried between authenticated peers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use witness_crypto::WitnessActor;
use witness_types::{Identity, KeyPair, Timestamp};

/// Header naming the message type that subscribers are keyed by.
pub const TYPE_HEADER: &str = "type";

/// Lifetime given to messages that do not set one explicitly.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Insertion-ordered string headers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set `key`, keeping its original position if it already exists.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A message envelope.
///
/// Deliverable only while `expiration > now` and while `sender.signature`
/// verifies over `payload`. Anything else is dropped at ingress without
/// being reported as an error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub headers: Headers,
    pub sender: WitnessActor,
    pub receiver: Option<Identity>,
    pub expiration: Timestamp,
    pub payload: Vec<u8>,
}

impl Message {
    /// Start building a message of the given type.
    pub fn builder(message_type: impl Into<String>) -> MessageBuilder {
        MessageBuilder::new(message_type)
    }

    pub fn message_type(&self) -> Option<&str> {
        self.headers.get(TYPE_HEADER)
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expiration.has_passed(now)
    }

    /// Whether the sender's signature covers the payload.
    pub fn is_authentic(&self) -> bool {
        self.sender.is_valid(&self.payload)
    }

    pub fn is_deliverable(&self, now: Timestamp) -> bool {
        !self.is_expired(now) && self.is_authentic()
    }
}

/// Builder for outbound [`Message`]s.
///
/// ```ignore
/// let msg = Message::builder("election.vote")
///     .header("subtype", "issue")
///     .ttl(Duration::from_secs(30))
///     .payload(bytes)
///     .sign("node-a", &keypair);
/// ```
#[derive(Debug)]
pub struct MessageBuilder {
    headers: Headers,
    receiver: Option<Identity>,
    expiration: Option<Timestamp>,
    ttl: Duration,
    payload: Vec<u8>,
}

impl MessageBuilder {
    fn new(message_type: impl Into<String>) -> Self {
        let mut headers = Headers::new();
        headers.insert(TYPE_HEADER, message_type);
        Self {
            headers,
            receiver: None,
            expiration: None,
            ttl: DEFAULT_TTL,
            payload: Vec::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Route to a single peer instead of broadcasting.
    pub fn receiver(mut self, receiver: Identity) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Expire `ttl` after signing. Ignored when [`expires_at`](Self::expires_at) is set.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn expires_at(mut self, expiration: Timestamp) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Sign the payload as `name` and produce the message.
    pub fn sign(self, name: &str, keypair: &KeyPair) -> Message {
        let expiration = self
            .expiration
            .unwrap_or_else(|| Timestamp::now().saturating_add(self.ttl));
        Message {
            headers: self.headers,
            sender: WitnessActor::sign(name, &self.payload, keypair),
            receiver: self.receiver,
            expiration,
            payload: self.payload,
        }
    }
}
