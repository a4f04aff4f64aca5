//! One voting round.
//!
//! A session collects at most one vote per actor name until it is
//! finalized, either by the manager's expiration timer or by cancellation.
//! After that it is frozen and its [`ElectionSummary`] is computed once and
//! cached.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::watch;
use witness_crypto::WitnessActor;
use witness_types::{EvidenceKey, Identity, Timestamp};

use crate::error::ElectionError;
use crate::summary::ElectionSummary;
use crate::wire::{ElectionTransport, VotePayload, SUBTYPE_VOTE};

/// Identifies a session: organizer plus subject.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub organizer_name: String,
    pub organizer: Identity,
    pub subject: String,
}

impl SessionKey {
    pub fn new(organizer: &WitnessActor, subject: &str) -> Self {
        Self {
            organizer_name: organizer.name.clone(),
            organizer: *organizer.identity(),
            subject: subject.to_owned(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.organizer_name, self.organizer, self.subject)
    }
}

/// A single actor's accepted vote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vote {
    pub actor: WitnessActor,
    /// Grouping key of `evidence`; not an integrity check.
    pub key: EvidenceKey,
    pub evidence: Vec<u8>,
}

impl Vote {
    pub fn new(actor: WitnessActor, evidence: Vec<u8>) -> Self {
        Self {
            key: EvidenceKey::of(&evidence),
            actor,
            evidence,
        }
    }
}

#[derive(Default)]
struct SessionState {
    votes: HashMap<String, Vote>,
    finalized: bool,
    canceled: bool,
}

pub struct ElectionSession {
    key: SessionKey,
    organizer: WitnessActor,
    subject: String,
    expiration: Timestamp,
    data: Vec<u8>,
    state: Mutex<SessionState>,
    finalized_cv: Condvar,
    finalized_tx: watch::Sender<bool>,
    summary: OnceLock<ElectionSummary>,
    transport: Arc<dyn ElectionTransport>,
}

impl ElectionSession {
    pub(crate) fn new(
        organizer: WitnessActor,
        subject: String,
        expiration: Timestamp,
        data: Vec<u8>,
        transport: Arc<dyn ElectionTransport>,
    ) -> Self {
        let (finalized_tx, _) = watch::channel(false);
        Self {
            key: SessionKey::new(&organizer, &subject),
            organizer,
            subject,
            expiration,
            data,
            state: Mutex::new(SessionState::default()),
            finalized_cv: Condvar::new(),
            finalized_tx,
            summary: OnceLock::new(),
            transport,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn organizer(&self) -> &WitnessActor {
        &self.organizer
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn expiration(&self) -> Timestamp {
        self.expiration
    }

    /// What the organizer put up for the vote.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Vote `evidence` as this node.
    pub fn submit(&self, evidence: Vec<u8>) -> bool {
        let actor = WitnessActor::sign(
            self.transport.actor_name(),
            &evidence,
            self.transport.keypair(),
        );
        self.submit_as(actor, evidence)
    }

    /// Apply a vote and, only if it was accepted, broadcast it.
    ///
    /// Returns `false` for late votes and votes whose signature does not
    /// cover `evidence`.
    pub fn submit_as(&self, actor: WitnessActor, evidence: Vec<u8>) -> bool {
        if !self.on_vote(actor.clone(), evidence.clone()) {
            return false;
        }
        let payload = VotePayload {
            organizer: self.organizer.clone(),
            subject: self.subject.clone(),
            evidence,
            voter: actor,
        };
        match payload.encode() {
            Ok(bytes) => {
                let peers = self.transport.broadcast(SUBTYPE_VOTE, bytes, self.expiration);
                tracing::debug!(session = %self.key, peers, "vote broadcast");
            }
            Err(e) => tracing::warn!(session = %self.key, error = %e, "cannot encode vote"),
        }
        true
    }

    /// Record `actor`'s vote, replacing any earlier vote under the same name.
    pub fn on_vote(&self, actor: WitnessActor, evidence: Vec<u8>) -> bool {
        if !actor.is_valid(&evidence) {
            tracing::debug!(session = %self.key, actor = %actor.name, "ignoring vote with invalid signature");
            return false;
        }
        let mut state = self.state.lock();
        if state.finalized || self.summary.get().is_some() {
            tracing::debug!(session = %self.key, actor = %actor.name, "late vote rejected");
            return false;
        }
        let vote = Vote::new(actor, evidence);
        tracing::trace!(session = %self.key, actor = %vote.actor.name, evidence = %vote.key, "vote recorded");
        state.votes.insert(vote.actor.name.clone(), vote);
        true
    }

    /// Finalize with the votes collected so far.
    ///
    /// Returns `false` if the session was already finalized.
    pub fn on_completed(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.finalized {
                return false;
            }
            state.finalized = true;
        }
        self.notify_finalized();
        tracing::debug!(session = %self.key, "session completed");
        true
    }

    /// Discard every vote, then finalize. A canceled session is never
    /// trustable or adoptable.
    pub fn on_canceled(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.finalized {
                return false;
            }
            state.votes.clear();
            state.canceled = true;
            state.finalized = true;
        }
        self.notify_finalized();
        tracing::debug!(session = %self.key, "session canceled");
        true
    }

    fn notify_finalized(&self) {
        self.finalized_cv.notify_all();
        self.finalized_tx.send_replace(true);
    }

    pub fn is_finalized(&self) -> bool {
        self.state.lock().finalized
    }

    pub fn is_canceled(&self) -> bool {
        self.state.lock().canceled
    }

    pub fn vote_count(&self) -> usize {
        self.state.lock().votes.len()
    }

    /// Block the calling thread until the session is finalized.
    ///
    /// Do not call from an async task; use
    /// [`summarize_async`](Self::summarize_async) there.
    pub fn summarize(&self) -> ElectionSummary {
        let mut state = self.state.lock();
        while !state.finalized {
            self.finalized_cv.wait(&mut state);
        }
        self.summary
            .get_or_init(|| ElectionSummary::from_votes(state.votes.values()))
            .clone()
    }

    /// Wait up to `timeout` for finalization, then summarize.
    pub async fn summarize_async(&self, timeout: Duration) -> Result<ElectionSummary, ElectionError> {
        let mut finalized = self.finalized_tx.subscribe();
        match tokio::time::timeout(timeout, finalized.wait_for(|done| *done)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => return Err(ElectionError::Disposed),
            Err(_) => return Err(ElectionError::Timeout),
        }
        self.try_summary().ok_or(ElectionError::Disposed)
    }

    /// The summary, if the session has been finalized.
    pub fn try_summary(&self) -> Option<ElectionSummary> {
        let state = self.state.lock();
        if !state.finalized {
            return None;
        }
        Some(
            self.summary
                .get_or_init(|| ElectionSummary::from_votes(state.votes.values()))
                .clone(),
        )
    }
}

impl fmt::Debug for ElectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElectionSession")
            .field("key", &self.key)
            .field("expiration", &self.expiration)
            .field("votes", &self.vote_count())
            .field("finalized", &self.is_finalized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingTransport;
    use witness_crypto::generate_keypair;
    use witness_types::KeyPair;

    fn session(transport: &Arc<RecordingTransport>) -> ElectionSession {
        let organizer = WitnessActor::sign("org", b"data", &transport.keypair);
        ElectionSession::new(
            organizer,
            "block-1".into(),
            Timestamp::now().saturating_add(Duration::from_secs(60)),
            b"data".to_vec(),
            Arc::clone(transport) as Arc<dyn ElectionTransport>,
        )
    }

    fn actor(name: &str, evidence: &[u8], kp: &KeyPair) -> WitnessActor {
        WitnessActor::sign(name, evidence, kp)
    }

    #[test]
    fn later_vote_from_same_actor_replaces_earlier() {
        let transport = RecordingTransport::new("me");
        let s = session(&transport);
        let kp = generate_keypair();

        assert!(s.on_vote(actor("a", b"h1", &kp), b"h1".to_vec()));
        assert!(s.on_vote(actor("a", b"h2", &kp), b"h2".to_vec()));
        assert_eq!(s.vote_count(), 1);
        s.on_completed();

        let summary = s.summarize();
        assert_eq!(summary.total_votes, 1);
        assert_eq!(summary.adopted_evidence.as_deref(), Some(&b"h2"[..]));
    }

    #[test]
    fn cancellation_discards_votes() {
        let transport = RecordingTransport::new("me");
        let s = session(&transport);
        for name in ["a", "b", "c", "d", "e"] {
            assert!(s.on_vote(actor(name, b"h1", &generate_keypair()), b"h1".to_vec()));
        }

        assert!(s.on_canceled());
        let summary = s.summarize();
        assert!(s.is_canceled());
        assert_eq!(summary.total_votes, 0);
        assert!(!summary.is_trustable);
        assert!(!summary.is_adoptable);
    }

    #[test]
    fn late_vote_is_rejected_and_summary_unchanged() {
        let transport = RecordingTransport::new("me");
        let s = session(&transport);
        s.submit(b"h1".to_vec());
        s.on_completed();
        let before = s.summarize();

        assert!(!s.submit(b"h2".to_vec()));
        assert!(!s.on_vote(actor("z", b"h2", &generate_keypair()), b"h2".to_vec()));
        assert_eq!(s.summarize(), before);
        assert_eq!(transport.sent_count(), 1);
    }

    #[test]
    fn forged_vote_is_rejected_without_broadcast() {
        let transport = RecordingTransport::new("me");
        let s = session(&transport);
        let signed_other = actor("a", b"h1", &generate_keypair());

        assert!(!s.submit_as(signed_other, b"h2".to_vec()));
        assert_eq!(s.vote_count(), 0);
        assert_eq!(transport.sent_count(), 0);
    }

    #[test]
    fn local_submit_broadcasts_a_signed_vote() {
        let transport = RecordingTransport::new("me");
        let s = session(&transport);

        assert!(s.submit(b"h1".to_vec()));
        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subtype, SUBTYPE_VOTE);
        assert_eq!(sent[0].expiration, s.expiration());
        let vote = VotePayload::decode(&sent[0].payload).unwrap();
        assert!(vote.is_valid());
        assert_eq!(vote.voter.name, "me");
        assert_eq!(vote.subject, "block-1");
    }

    #[test]
    fn finalization_happens_once() {
        let transport = RecordingTransport::new("me");
        let s = session(&transport);
        assert!(s.on_completed());
        assert!(!s.on_completed());
        assert!(!s.on_canceled());
        assert!(!s.is_canceled());
    }

    #[test]
    fn summarize_blocks_until_completed() {
        let transport = RecordingTransport::new("me");
        let s = Arc::new(session(&transport));
        s.submit(b"h1".to_vec());

        let waiter = {
            let s = Arc::clone(&s);
            std::thread::spawn(move || s.summarize())
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(s.try_summary().is_none());
        s.on_completed();

        let summary = waiter.join().unwrap();
        assert_eq!(summary.total_votes, 1);
    }

    #[tokio::test]
    async fn summarize_async_times_out_while_open() {
        let transport = RecordingTransport::new("me");
        let s = session(&transport);
        let result = s.summarize_async(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ElectionError::Timeout)));
    }

    #[tokio::test]
    async fn summarize_async_wakes_on_cancel() {
        let transport = RecordingTransport::new("me");
        let s = Arc::new(session(&transport));
        s.submit(b"h1".to_vec());

        let canceler = {
            let s = Arc::clone(&s);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                s.on_canceled();
            })
        };
        let summary = s.summarize_async(Duration::from_secs(2)).await.unwrap();
        canceler.await.unwrap();
        assert!(!summary.is_adoptable);
    }
}
