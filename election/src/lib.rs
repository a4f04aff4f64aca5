//! Leaderless, time-bounded evidence voting.
//!
//! An organizer issues a session on a subject; every node that sees the
//! issue frame may vote evidence bytes until the session's expiration. At
//! expiration each node finalizes its own copy of the session and derives
//! an [`ElectionSummary`] from the votes it observed.
//!
//! - [`manager`]: active sessions, inbound routing, the expiration timer
//! - [`session`]: vote collection and finalization for one round
//! - [`summary`]: grouping and the trustable/adoptable rules
//! - [`wire`]: issue/vote payloads and the [`ElectionTransport`] seam

pub mod error;
pub mod manager;
pub mod session;
pub mod summary;
pub mod wire;

#[cfg(test)]
mod test_support;

pub use error::ElectionError;
pub use manager::{ElectionManager, ObserverHandle, SessionObserver, DEFAULT_TICK};
pub use session::{ElectionSession, SessionKey, Vote};
pub use summary::{ElectionSummary, Evidence, QUORUM_FLOOR};
pub use wire::{
    election_message, ElectionTransport, IssuePayload, VotePayload, ELECTION_MESSAGE_TYPE,
    SUBTYPE_HEADER, SUBTYPE_ISSUE, SUBTYPE_VOTE,
};
