//! Election sub-protocol payloads.
//!
//! Election frames are ordinary [`Message`]s with `type = "election.vote"`
//! and a `subtype` header of `"issue"` or `"vote"`. The payload is the
//! bincode encoding of [`IssuePayload`] or [`VotePayload`].

use serde::{Deserialize, Serialize};
use witness_crypto::WitnessActor;
use witness_network::Messenger;
use witness_protocol::{codec, Message, MessageBuilder};
use witness_types::{KeyPair, Timestamp};

use crate::error::ElectionError;

pub const ELECTION_MESSAGE_TYPE: &str = "election.vote";
pub const SUBTYPE_HEADER: &str = "subtype";
pub const SUBTYPE_ISSUE: &str = "issue";
pub const SUBTYPE_VOTE: &str = "vote";

/// Announces a new session. `organizer` signs `evidence` (the session data).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuePayload {
    pub organizer: WitnessActor,
    pub subject: String,
    pub evidence: Vec<u8>,
}

/// One actor's vote in the session `(organizer, subject)`. `voter` signs
/// `evidence`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotePayload {
    pub organizer: WitnessActor,
    pub subject: String,
    pub evidence: Vec<u8>,
    pub voter: WitnessActor,
}

impl IssuePayload {
    pub fn encode(&self) -> Result<Vec<u8>, ElectionError> {
        Ok(codec::encode(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ElectionError> {
        Ok(codec::decode(bytes)?)
    }

    pub fn is_valid(&self) -> bool {
        self.organizer.is_valid(&self.evidence)
    }
}

impl VotePayload {
    pub fn encode(&self) -> Result<Vec<u8>, ElectionError> {
        Ok(codec::encode(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ElectionError> {
        Ok(codec::decode(bytes)?)
    }

    pub fn is_valid(&self) -> bool {
        self.voter.is_valid(&self.evidence)
    }
}

/// Start an election frame of the given subtype.
pub fn election_message(subtype: &str, payload: Vec<u8>, expiration: Timestamp) -> MessageBuilder {
    Message::builder(ELECTION_MESSAGE_TYPE)
        .header(SUBTYPE_HEADER, subtype)
        .expires_at(expiration)
        .payload(payload)
}

/// How sessions sign and publish election frames.
///
/// Implemented by [`Messenger`]; tests substitute a recording double.
pub trait ElectionTransport: Send + Sync + 'static {
    /// Actor name this node votes and organizes as.
    fn actor_name(&self) -> &str;

    fn keypair(&self) -> &KeyPair;

    /// Sign and broadcast an election frame. Returns the number of peers it
    /// was queued for.
    fn broadcast(&self, subtype: &str, payload: Vec<u8>, expiration: Timestamp) -> usize;
}

impl ElectionTransport for Messenger {
    fn actor_name(&self) -> &str {
        self.name()
    }

    fn keypair(&self) -> &KeyPair {
        Messenger::keypair(self).as_ref()
    }

    fn broadcast(&self, subtype: &str, payload: Vec<u8>, expiration: Timestamp) -> usize {
        let message = self.sign(election_message(subtype, payload, expiration));
        self.emit(&message)
    }
}
