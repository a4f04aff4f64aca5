//! Owns every active session on a node.
//!
//! The manager issues sessions, turns inbound issue/vote frames into
//! session updates, and runs the expiration timer that finalizes sessions
//! once their deadline passes. Sessions leave the active set as soon as
//! they are finalized; callers keep their `Arc` to read the summary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use witness_crypto::WitnessActor;
use witness_network::{Messenger, Subscription};
use witness_protocol::Message;
use witness_types::Timestamp;

use crate::error::ElectionError;
use crate::session::{ElectionSession, SessionKey};
use crate::wire::{
    ElectionTransport, IssuePayload, VotePayload, ELECTION_MESSAGE_TYPE, SUBTYPE_HEADER,
    SUBTYPE_ISSUE, SUBTYPE_VOTE,
};

/// Default scan interval of the expiration timer.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Called once per newly observed session, local or remote.
pub type SessionObserver = Arc<dyn Fn(&Arc<ElectionSession>) + Send + Sync>;

struct Timer {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct ManagerInner {
    transport: Arc<dyn ElectionTransport>,
    sessions: Mutex<HashMap<SessionKey, Arc<ElectionSession>>>,
    observers: RwLock<Vec<(u64, SessionObserver)>>,
    next_observer: AtomicU64,
    timer: Mutex<Option<Timer>>,
    tick: Duration,
    disposed: AtomicBool,
}

#[derive(Clone)]
pub struct ElectionManager {
    inner: Arc<ManagerInner>,
}

impl ElectionManager {
    pub fn new(transport: Arc<dyn ElectionTransport>, tick: Duration) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                transport,
                sessions: Mutex::new(HashMap::new()),
                observers: RwLock::new(Vec::new()),
                next_observer: AtomicU64::new(1),
                timer: Mutex::new(None),
                tick,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Open a session on `subject`, organized by this node, that expires
    /// `duration` from now. The issue frame is broadcast before returning.
    pub fn issue(
        &self,
        subject: impl Into<String>,
        data: Vec<u8>,
        duration: Duration,
    ) -> Result<Arc<ElectionSession>, ElectionError> {
        let subject = subject.into();
        let transport = &self.inner.transport;
        let organizer = WitnessActor::sign(transport.actor_name(), &data, transport.keypair());
        let expiration = Timestamp::now().saturating_add(duration);
        let payload = IssuePayload {
            organizer: organizer.clone(),
            subject: subject.clone(),
            evidence: data.clone(),
        }
        .encode()?;

        let session = Arc::new(ElectionSession::new(
            organizer,
            subject.clone(),
            expiration,
            data,
            Arc::clone(transport),
        ));
        {
            let mut sessions = self.inner.sessions.lock();
            // `dispose` drains under this lock after setting the flag.
            if self.is_disposed() {
                return Err(ElectionError::Disposed);
            }
            if sessions.contains_key(session.key()) {
                return Err(ElectionError::AlreadyActive(subject));
            }
            sessions.insert(session.key().clone(), Arc::clone(&session));
        }

        tracing::info!(session = %session.key(), %expiration, "election issued");
        // Peers must learn the session before any vote an observer sends.
        let peers = transport.broadcast(SUBTYPE_ISSUE, payload, expiration);
        tracing::debug!(session = %session.key(), peers, "issue broadcast");
        self.ensure_timer();
        self.notify_observers(&session);
        Ok(session)
    }

    /// Register `observer` for newly observed sessions. It stays registered
    /// until the returned handle is dropped.
    pub fn subscribe<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&Arc<ElectionSession>) + Send + Sync + 'static,
    {
        let id = self.inner.next_observer.fetch_add(1, Ordering::Relaxed);
        self.inner.observers.write().push((id, Arc::new(observer)));
        ObserverHandle {
            manager: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Route `election.vote` frames to `on_message` until the returned
    /// subscription is dropped.
    pub fn listen(&self, messenger: &Messenger) -> Subscription {
        let manager = Arc::downgrade(&self.inner);
        messenger.subscribe(ELECTION_MESSAGE_TYPE, move |message| {
            if let Some(inner) = manager.upgrade() {
                ElectionManager { inner }.on_message(message);
            }
        })
    }

    /// Handle one inbound election frame. Frames that fail to decode or
    /// carry an invalid signature are ignored.
    pub fn on_message(&self, message: &Message) {
        if self.is_disposed() {
            return;
        }
        match message.header(SUBTYPE_HEADER) {
            Some(SUBTYPE_ISSUE) => self.on_issue(message),
            Some(SUBTYPE_VOTE) => self.on_vote(message),
            other => {
                tracing::debug!(subtype = ?other, "ignoring election frame with unknown subtype");
            }
        }
    }

    fn on_issue(&self, message: &Message) {
        let issue = match IssuePayload::decode(&message.payload) {
            Ok(issue) => issue,
            Err(e) => {
                tracing::debug!(error = %e, "undecodable issue frame");
                return;
            }
        };
        if !issue.is_valid() {
            tracing::debug!(subject = %issue.subject, "ignoring issue with invalid organizer signature");
            return;
        }

        let key = SessionKey::new(&issue.organizer, &issue.subject);
        let session = {
            let mut sessions = self.inner.sessions.lock();
            if self.is_disposed() || sessions.contains_key(&key) {
                return;
            }
            let session = Arc::new(ElectionSession::new(
                issue.organizer,
                issue.subject,
                message.expiration,
                issue.evidence,
                Arc::clone(&self.inner.transport),
            ));
            sessions.insert(key, Arc::clone(&session));
            session
        };

        tracing::info!(session = %session.key(), expiration = %session.expiration(), "election observed");
        self.notify_observers(&session);
        self.ensure_timer();
    }

    fn on_vote(&self, message: &Message) {
        let vote = match VotePayload::decode(&message.payload) {
            Ok(vote) => vote,
            Err(e) => {
                tracing::debug!(error = %e, "undecodable vote frame");
                return;
            }
        };
        if !vote.is_valid() {
            tracing::debug!(subject = %vote.subject, "ignoring vote with invalid voter signature");
            return;
        }
        let key = SessionKey::new(&vote.organizer, &vote.subject);
        match self.find(&key) {
            Some(session) => {
                session.on_vote(vote.voter, vote.evidence);
            }
            None => tracing::debug!(session = %key, "vote for unknown session dropped"),
        }
    }

    /// Finalize and remove every session whose expiration is at or before
    /// `now`. Returns the finalized sessions.
    pub fn expire_due(&self, now: Timestamp) -> Vec<Arc<ElectionSession>> {
        let due: Vec<Arc<ElectionSession>> = {
            let mut sessions = self.inner.sessions.lock();
            let keys: Vec<SessionKey> = sessions
                .iter()
                .filter(|(_, s)| s.expiration().has_passed(now))
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| sessions.remove(k)).collect()
        };
        for session in &due {
            session.on_completed();
            tracing::info!(session = %session.key(), votes = session.vote_count(), "election finalized");
        }
        due
    }

    /// Stop the timer, wait for it to exit, then cancel every session still
    /// active. Later `issue` calls fail with [`ElectionError::Disposed`].
    ///
    /// Inserts re-check the flag under the sessions lock, so nothing lands
    /// after the drain below.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let timer = self.inner.timer.lock().take();
        if let Some(timer) = timer {
            timer.stop.send_replace(true);
            let _ = timer.task.await;
        }

        let remaining: Vec<Arc<ElectionSession>> =
            self.inner.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in &remaining {
            session.on_canceled();
        }
        self.inner.observers.write().clear();
        tracing::info!(canceled = remaining.len(), "election manager disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub fn find(&self, key: &SessionKey) -> Option<Arc<ElectionSession>> {
        self.inner.sessions.lock().get(key).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub fn sessions(&self) -> Vec<Arc<ElectionSession>> {
        self.inner.sessions.lock().values().cloned().collect()
    }

    fn notify_observers(&self, session: &Arc<ElectionSession>) {
        let observers: Vec<SessionObserver> = self
            .inner
            .observers
            .read()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();
        for observer in observers {
            observer(session);
        }
    }

    /// Spawn the expiration timer on first use. Without a Tokio runtime the
    /// timer is not started and expiry is left to explicit `expire_due`.
    fn ensure_timer(&self) {
        let mut timer = self.inner.timer.lock();
        if timer.is_some() || self.is_disposed() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime, election timer not started");
            return;
        };
        let (stop, stopped) = watch::channel(false);
        let task = runtime.spawn(run_timer(
            Arc::downgrade(&self.inner),
            self.inner.tick,
            stopped,
        ));
        *timer = Some(Timer { stop, task });
    }
}

async fn run_timer(manager: Weak<ManagerInner>, tick: Duration, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop.wait_for(|stopped| *stopped) => break,
            _ = interval.tick() => {}
        }
        let Some(inner) = manager.upgrade() else {
            break;
        };
        ElectionManager { inner }.expire_due(Timestamp::now());
    }
    tracing::debug!("election timer stopped");
}

/// Keeps a session observer registered; unregisters it on drop.
#[must_use = "dropping an ObserverHandle unregisters its observer"]
pub struct ObserverHandle {
    manager: Weak<ManagerInner>,
    id: u64,
}

impl ObserverHandle {
    pub fn dispose(self) {}
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.manager.upgrade() {
            inner.observers.write().retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingTransport;
    use std::sync::atomic::AtomicUsize;
    use witness_crypto::generate_keypair;

    fn manager(name: &str) -> (ElectionManager, Arc<RecordingTransport>) {
        let transport = RecordingTransport::new(name);
        let manager = ElectionManager::new(
            Arc::clone(&transport) as Arc<dyn ElectionTransport>,
            Duration::from_millis(20),
        );
        (manager, transport)
    }

    #[test]
    fn issue_registers_and_broadcasts() {
        let (m, t) = manager("org");
        let session = m.issue("block-1", b"data".to_vec(), Duration::from_secs(60)).unwrap();

        assert_eq!(m.active_count(), 1);
        assert!(m.find(session.key()).is_some());
        let sent = t.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subtype, SUBTYPE_ISSUE);
        assert_eq!(sent[0].expiration, session.expiration());
        let issue = IssuePayload::decode(&sent[0].payload).unwrap();
        assert!(issue.is_valid());
        assert_eq!(issue.subject, "block-1");
    }

    #[test]
    fn issue_frame_precedes_observer_votes() {
        let (m, t) = manager("org");
        let _observer = m.subscribe(|session| {
            session.submit(b"h1".to_vec());
        });
        let session = m.issue("block-1", b"data".to_vec(), Duration::from_secs(60)).unwrap();

        let sent = t.take();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].subtype, SUBTYPE_ISSUE);
        assert_eq!(sent[1].subtype, SUBTYPE_VOTE);
        assert_eq!(session.vote_count(), 1);
    }

    #[test]
    fn issue_frame_after_disposal_flag_is_not_registered() {
        let (organizer, org_t) = manager("org");
        let (peer, _) = manager("peer");
        organizer.issue("block-1", b"data".to_vec(), Duration::from_secs(60)).unwrap();
        let frames = org_t.take_messages();

        // A read task that passed the entry check just before `dispose` flipped the flag.
        peer.inner.disposed.store(true, Ordering::SeqCst);
        peer.on_issue(&frames[0]);

        assert_eq!(peer.active_count(), 0);
    }

    #[test]
    fn reissuing_an_active_subject_fails() {
        let (m, _) = manager("org");
        m.issue("block-1", b"data".to_vec(), Duration::from_secs(60)).unwrap();
        let again = m.issue("block-1", b"data".to_vec(), Duration::from_secs(60));
        assert!(matches!(again, Err(ElectionError::AlreadyActive(s)) if s == "block-1"));
    }

    #[test]
    fn inbound_issue_creates_one_session() {
        let (organizer, org_t) = manager("org");
        let (peer, _) = manager("peer");
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let _observer = peer.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let local = organizer.issue("block-1", b"data".to_vec(), Duration::from_secs(60)).unwrap();
        let frames = org_t.take_messages();
        peer.on_message(&frames[0]);
        peer.on_message(&frames[0]);

        assert_eq!(peer.active_count(), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        let remote = peer.find(local.key()).unwrap();
        assert_eq!(remote.expiration(), local.expiration());
        assert_eq!(remote.data(), b"data");
    }

    #[test]
    fn forged_issue_is_ignored() {
        let (peer, _) = manager("peer");
        let kp = generate_keypair();
        let payload = IssuePayload {
            organizer: WitnessActor::sign("org", b"data", &kp),
            subject: "block-1".into(),
            evidence: b"tampered".to_vec(),
        };
        let msg = crate::wire::election_message(
            SUBTYPE_ISSUE,
            payload.encode().unwrap(),
            Timestamp::now().saturating_add(Duration::from_secs(60)),
        )
        .sign("org", &kp);

        peer.on_message(&msg);
        assert_eq!(peer.active_count(), 0);
    }

    #[test]
    fn inbound_vote_reaches_its_session() {
        let (organizer, org_t) = manager("org");
        let (voter, voter_t) = manager("voter");

        organizer.issue("block-1", b"data".to_vec(), Duration::from_secs(60)).unwrap();
        let issue = org_t.take_messages();
        voter.on_message(&issue[0]);
        voter.sessions()[0].submit(b"h1".to_vec());

        for frame in voter_t.take_messages() {
            organizer.on_message(&frame);
        }
        assert_eq!(organizer.sessions()[0].vote_count(), 1);
    }

    #[test]
    fn vote_for_unknown_session_is_dropped() {
        let (organizer, org_t) = manager("org");
        let (other, _) = manager("other");
        let session = organizer.issue("block-1", b"data".to_vec(), Duration::from_secs(60)).unwrap();
        session.submit(b"h1".to_vec());
        let frames = org_t.take_messages();

        other.on_message(&frames[1]);
        assert_eq!(other.active_count(), 0);
    }

    #[test]
    fn forged_vote_is_ignored() {
        let (organizer, _) = manager("org");
        let session = organizer.issue("block-1", b"data".to_vec(), Duration::from_secs(60)).unwrap();
        let kp = generate_keypair();
        let payload = VotePayload {
            organizer: session.organizer().clone(),
            subject: "block-1".into(),
            evidence: b"h2".to_vec(),
            voter: WitnessActor::sign("mallory", b"h1", &kp),
        };
        let msg = crate::wire::election_message(SUBTYPE_VOTE, payload.encode().unwrap(), session.expiration())
            .sign("mallory", &kp);

        organizer.on_message(&msg);
        assert_eq!(session.vote_count(), 0);
    }

    #[test]
    fn expire_due_finalizes_and_removes() {
        let (m, _) = manager("org");
        let short = m.issue("short", b"d".to_vec(), Duration::from_secs(1)).unwrap();
        let long = m.issue("long", b"d".to_vec(), Duration::from_secs(600)).unwrap();
        short.submit(b"h1".to_vec());

        let expired = m.expire_due(short.expiration());

        assert_eq!(expired.len(), 1);
        assert!(short.is_finalized());
        assert!(!long.is_finalized());
        assert_eq!(m.active_count(), 1);
        assert_eq!(short.summarize().total_votes, 1);
    }

    #[test]
    fn dropped_observer_is_not_called() {
        let (m, _) = manager("org");
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let observer = m.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        m.issue("a", b"d".to_vec(), Duration::from_secs(60)).unwrap();
        drop(observer);
        m.issue("b", b"d".to_vec(), Duration::from_secs(60)).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timer_finalizes_expired_sessions() {
        let (m, _) = manager("org");
        let session = m.issue("block-1", b"d".to_vec(), Duration::from_millis(50)).unwrap();
        session.submit(b"h1".to_vec());

        let summary = session.summarize_async(Duration::from_secs(2)).await.unwrap();
        assert_eq!(summary.total_votes, 1);
        assert!(summary.is_adoptable);
        assert!(!summary.is_trustable);
        assert_eq!(m.active_count(), 0);
    }

    #[tokio::test]
    async fn dispose_cancels_open_sessions() {
        let (m, _) = manager("org");
        let session = m.issue("block-1", b"d".to_vec(), Duration::from_secs(600)).unwrap();
        for name in ["a", "b", "c"] {
            session.submit_as(WitnessActor::sign(name, b"h1", &generate_keypair()), b"h1".to_vec());
        }

        m.dispose().await;

        assert!(session.is_canceled());
        let summary = session.summarize_async(Duration::from_secs(1)).await.unwrap();
        assert!(!summary.is_trustable);
        assert!(!summary.is_adoptable);
        assert_eq!(m.active_count(), 0);
        assert!(matches!(
            m.issue("block-2", b"d".to_vec(), Duration::from_secs(1)),
            Err(ElectionError::Disposed)
        ));
    }
}
