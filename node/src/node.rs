//! The witness node: wires transport, messenger and elections together.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use witness_election::{ElectionManager, ElectionTransport, ObserverHandle};
use witness_network::{
    ConnectionContext, ConnectionPool, ContactManager, DialOutcome, InboundHandler, Listener,
    Messenger, ShutdownController, ShutdownSignal, Subscription,
};
use witness_protocol::Message;
use witness_types::{Identity, KeyPair};

use crate::config::NodeConfig;
use crate::identity::load_or_create_keypair;
use crate::metrics::NodeMetrics;
use crate::NodeError;

/// Upper bound on waiting for background tasks during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Counts delivered messages before handing them to the messenger.
struct NodeInbound {
    messenger: Messenger,
    metrics: Arc<NodeMetrics>,
}

impl InboundHandler for NodeInbound {
    fn on_message(&self, peer: &Identity, message: Message) {
        self.metrics
            .messages_received
            .with_label_values(&[message.message_type().unwrap_or("")])
            .inc();
        self.messenger.on_message(peer, message);
    }
}

pub struct WitnessNode {
    config: NodeConfig,
    keypair: Arc<KeyPair>,
    pool: ConnectionPool,
    messenger: Messenger,
    elections: ElectionManager,
    contacts: ContactManager,
    ctx: ConnectionContext,
    metrics: Arc<NodeMetrics>,
    shutdown: ShutdownController,
    local_addr: Option<SocketAddr>,
    election_subscription: Mutex<Option<Subscription>>,
    session_observer: Mutex<Option<ObserverHandle>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WitnessNode {
    /// Build a node whose identity is loaded from (or created in)
    /// `config.data_dir`.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let keypair = load_or_create_keypair(&config.key_path())?;
        Self::with_keypair(config, keypair)
    }

    /// Build a node with an explicit identity; nothing touches disk.
    pub fn with_keypair(config: NodeConfig, keypair: KeyPair) -> Result<Self, NodeError> {
        let keypair = Arc::new(keypair);
        let metrics = Arc::new(NodeMetrics::new()?);
        let pool = ConnectionPool::new();
        let messenger = Messenger::new(
            config.name.clone(),
            Arc::clone(&keypair),
            pool.clone(),
            config.message_ttl(),
        );
        let elections = ElectionManager::new(
            Arc::new(messenger.clone()) as Arc<dyn ElectionTransport>,
            config.election_tick(),
        );
        let ctx = ConnectionContext {
            keypair: Arc::clone(&keypair),
            pool: pool.clone(),
            inbound: Arc::new(NodeInbound {
                messenger: messenger.clone(),
                metrics: Arc::clone(&metrics),
            }),
            config: Arc::new(config.transport()),
        };
        let shutdown = ShutdownController::new();
        let contacts = ContactManager::new(ctx.clone(), shutdown.subscribe());

        Ok(Self {
            config,
            keypair,
            pool,
            messenger,
            elections,
            contacts,
            ctx,
            metrics,
            shutdown,
            local_addr: None,
            election_subscription: Mutex::new(None),
            session_observer: Mutex::new(None),
            task_handles: Mutex::new(Vec::new()),
        })
    }

    /// Bind the listener, hook elections up to the messenger, start the
    /// metrics sampler and dial the bootstrap peers.
    ///
    /// Returns the bound listen address.
    pub async fn start(&mut self) -> Result<SocketAddr, NodeError> {
        if self.local_addr.is_some() {
            return Err(NodeError::AlreadyStarted);
        }
        let bootstrap = self.config.bootstrap_addrs()?;

        let listener = Listener::bind(self.config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);
        tracing::info!(
            name = %self.config.name,
            identity = %self.keypair.identity,
            addr = %local_addr,
            "witness node starting"
        );

        let listener_task = tokio::spawn(listener.run(self.ctx.clone(), self.shutdown.subscribe()));
        self.task_handles.lock().push(listener_task);

        *self.election_subscription.lock() = Some(self.elections.listen(&self.messenger));
        let observed = self.metrics.sessions_observed.clone();
        *self.session_observer.lock() = Some(self.elections.subscribe(move |session| {
            observed.inc();
            tracing::debug!(session = %session.key(), "session observed");
        }));

        let sampler = tokio::spawn(sample_metrics(
            Arc::clone(&self.metrics),
            self.pool.clone(),
            self.elections.clone(),
            self.config.election_tick(),
            self.shutdown.subscribe(),
        ));
        self.task_handles.lock().push(sampler);

        for addr in bootstrap {
            self.connect(addr);
        }
        Ok(local_addr)
    }

    /// Dial `addr` in the background. Returns `false` if it is already being
    /// dialed or the node is shutting down.
    pub fn connect(&self, addr: SocketAddr) -> bool {
        let Some(dial) = self.contacts.connect(addr) else {
            return false;
        };
        let task = tokio::spawn(async move {
            match dial.await {
                Ok(DialOutcome::Disconnected(peer)) => {
                    tracing::debug!(addr = %addr, peer = %peer, "dialed peer disconnected");
                }
                Ok(DialOutcome::Rejected(e)) => {
                    tracing::warn!(addr = %addr, error = %e, "dialed peer rejected");
                }
                Ok(DialOutcome::Abandoned { attempts }) => {
                    tracing::warn!(addr = %addr, attempts, "gave up dialing peer");
                }
                Ok(DialOutcome::Cancelled) => {}
                Err(e) => tracing::error!(addr = %addr, error = %e, "dial task failed"),
            }
        });
        self.task_handles.lock().push(task);
        true
    }

    /// Wait for SIGINT or SIGTERM, then trigger shutdown.
    pub async fn wait_for_signal(&self) {
        self.shutdown.wait_for_signal().await;
    }

    /// Stop accepting and dialing, cancel live sessions, and wait for
    /// background tasks to exit.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        tracing::info!("witness node stopping");
        self.shutdown.shutdown();

        self.elections.dispose().await;
        self.election_subscription.lock().take();
        self.session_observer.lock().take();

        let handles: Vec<JoinHandle<()>> = self.task_handles.lock().drain(..).collect();
        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await.is_err() {
            tracing::warn!(timeout = ?SHUTDOWN_TIMEOUT, "some tasks did not stop in time");
            return Err(NodeError::ShutdownTimeout);
        }

        refresh_metrics(&self.metrics, &self.pool, &self.elections);
        tracing::info!("witness node stopped");
        Ok(())
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn identity(&self) -> Identity {
        self.keypair.identity
    }

    /// Listen address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    pub fn elections(&self) -> &ElectionManager {
        &self.elections
    }

    pub fn contacts(&self) -> &ContactManager {
        &self.contacts
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.subscribe()
    }
}

fn refresh_metrics(metrics: &NodeMetrics, pool: &ConnectionPool, elections: &ElectionManager) {
    metrics.peer_count.set(pool.len() as i64);
    metrics.sessions_active.set(elections.active_count() as i64);
}

async fn sample_metrics(
    metrics: Arc<NodeMetrics>,
    pool: ConnectionPool,
    elections: ElectionManager,
    every: Duration,
    mut shutdown: ShutdownSignal,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = interval.tick() => refresh_metrics(&metrics, &pool, &elections),
        }
    }
}
