//! The peer node: shared state, bootstrap, and the cooperating tasks.
//!
//! A running peer owns four activities: the acceptor ([`listener`]), the
//! receive-processor ([`receiver`]), the miner ([`miner`]), and the
//! one-shot bootstrap performed by [`Peer::start`]. They communicate
//! through the shared state in this module: the chain, the pending
//! transaction queue, the peer state variable, the inbound block
//! channel, and the tracker session.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::blockchain::Blockchain;
use crate::config::{NodeConfig, TamperType};
use crate::metrics::{MetricsRegistry, run_prometheus_http_server};
use crate::net::framed::FrameReader;
use crate::net::wire::{self, FrameTag, PeerAddr, PeerRequest, WireError};
use crate::tracker::TrackerClient;
use crate::types::identity::IdentityError;
use crate::types::{Block, Identity, PeerId, Transaction, TxData, unix_timestamp};

pub mod listener;
pub mod miner;
pub mod receiver;
pub mod state;
pub(crate) mod tamper;

pub use state::PeerState;

/// Timeout for outbound connects (broadcast and chain fetch).
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// How long shutdown waits for each task before giving up on it.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Bound on one whole-chain fetch during bootstrap.
const BOOTSTRAP_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fatal startup failure. Everything else in the node degrades to
/// "discard and continue"; these abort the process.
#[derive(Debug)]
pub enum NodeError {
    /// The listening port could not be bound.
    Bind(u16, String),
    /// Keypair generation failed.
    Identity(IdentityError),
    /// The tracker was unreachable or spoke garbage during registration.
    Tracker(WireError),
    /// The metrics registry could not be built.
    Metrics(prometheus::Error),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::Bind(port, msg) => write!(f, "cannot bind listening port {port}: {msg}"),
            NodeError::Identity(e) => write!(f, "cannot create peer identity: {e}"),
            NodeError::Tracker(e) => write!(f, "tracker registration failed: {e}"),
            NodeError::Metrics(e) => write!(f, "cannot build metrics registry: {e}"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<IdentityError> for NodeError {
    fn from(e: IdentityError) -> Self {
        NodeError::Identity(e)
    }
}

/// A block handed from the acceptor to the receive-processor, together
/// with the IP it arrived from (needed for the fork-resolution fetch).
pub(crate) struct InboundBlock {
    pub source_ip: IpAddr,
    pub block: Block,
}

/// State shared by every task of one peer.
pub(crate) struct Shared {
    pub identity: Identity,
    pub listening_port: u16,
    pub config: NodeConfig,
    /// The chain. Lock order: `state` before `chain` before `pending`;
    /// `tracker` is a leaf and is never held across another lock or any
    /// socket wait besides its own.
    pub chain: Mutex<Blockchain>,
    /// FIFO of transactions awaiting mining.
    pub pending: Mutex<VecDeque<Transaction>>,
    pub state: Mutex<PeerState>,
    pub tracker: Mutex<TrackerClient>,
    /// Producer side of the inbound block buffer (acceptor writes,
    /// receive-processor drains in arrival order).
    pub inbound: mpsc::UnboundedSender<InboundBlock>,
    /// Level-triggered shutdown flag.
    pub shutdown: watch::Sender<bool>,
    /// Blocks mined so far; drives the broadcast/tamper frequencies.
    pub mined_count: AtomicU64,
    pub metrics: Arc<MetricsRegistry>,
}

impl Shared {
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub async fn set_state(&self, state: PeerState) {
        *self.state.lock().await = state;
        tracing::debug!(%state, "peer state changed");
    }
}

/// Handle to a running peer node.
///
/// This is the application-layer interface: submit transactions,
/// snapshot the chain, shut down. Dropping the handle does not stop the
/// tasks; call [`shutdown`](Peer::shutdown).
pub struct Peer {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Peer {
    /// Boots a peer: binds the listening port, generates an identity,
    /// registers with the tracker, adopts the longest valid chain among
    /// the peers the tracker knows, then starts the acceptor, the
    /// receive-processor, and the miner.
    ///
    /// Passing port 0 binds an ephemeral port; the resolved port is what
    /// gets registered with the tracker and reported by
    /// [`listening_port`](Peer::listening_port).
    pub async fn start(
        listening_port: u16,
        tracker_host: &str,
        tracker_port: u16,
        config: NodeConfig,
    ) -> Result<Peer, NodeError> {
        let listener = TcpListener::bind(("0.0.0.0", listening_port))
            .await
            .map_err(|e| NodeError::Bind(listening_port, e.to_string()))?;
        let listening_port = listener
            .local_addr()
            .map_err(|e| NodeError::Bind(listening_port, e.to_string()))?
            .port();

        let identity = Identity::generate()?;
        tracing::info!(
            peer = %identity.peer_id().fingerprint(),
            port = listening_port,
            "peer identity generated"
        );

        let mut tracker = TrackerClient::connect(tracker_host, tracker_port)
            .await
            .map_err(NodeError::Tracker)?;
        let initial_peers = tracker
            .join(listening_port, identity.peer_id())
            .await
            .map_err(NodeError::Tracker)?;
        tracing::info!(peers = initial_peers.len(), "registered with tracker");

        let metrics = Arc::new(MetricsRegistry::new().map_err(NodeError::Metrics)?);

        let chain = bootstrap_chain(&initial_peers, config.difficulty).await;
        metrics.node.chain_height.set(chain.len() as i64);
        tracing::info!(height = chain.len(), "bootstrap complete");

        if config.metrics.enabled {
            let exporter_metrics = metrics.clone();
            let addr = config.metrics.listen_addr;
            tokio::spawn(async move {
                if let Err(e) = run_prometheus_http_server(exporter_metrics, addr).await {
                    tracing::warn!("metrics HTTP server error: {e}");
                }
            });
            tracing::info!("metrics exporter listening on http://{addr}/metrics");
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            identity,
            listening_port,
            config,
            chain: Mutex::new(chain),
            pending: Mutex::new(VecDeque::new()),
            state: Mutex::new(PeerState::Mining),
            tracker: Mutex::new(tracker),
            inbound: inbound_tx,
            shutdown: shutdown_tx,
            mined_count: AtomicU64::new(0),
            metrics,
        });

        let tasks = vec![
            (
                "acceptor",
                tokio::spawn(listener::run(shared.clone(), listener)),
            ),
            (
                "receive-processor",
                tokio::spawn(receiver::run(shared.clone(), inbound_rx)),
            ),
            ("miner", tokio::spawn(miner::run(shared.clone()))),
        ];

        Ok(Peer {
            shared,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn peer_id(&self) -> &PeerId {
        self.shared.identity.peer_id()
    }

    pub fn listening_port(&self) -> u16 {
        self.shared.listening_port
    }

    pub async fn state(&self) -> PeerState {
        *self.shared.state.lock().await
    }

    /// Enqueues an application payload for mining. The miner stamps and
    /// signs it when it reaches the head of the queue.
    pub async fn submit_transaction(&self, data: TxData) {
        let txn = Transaction::new(self.peer_id().clone(), unix_timestamp(), data);
        self.shared.pending.lock().await.push_back(txn);
    }

    /// Shallow copy of the chain, taken under the chain lock.
    pub async fn snapshot_chain(&self) -> Vec<Block> {
        self.shared.chain.lock().await.snapshot()
    }

    /// Runs the termination sequence: flip the state, raise the shutdown
    /// flag, tell the tracker goodbye, and join every task with a bounded
    /// wait. Tasks that fail to finish are reported, not killed.
    pub async fn shutdown(&self) {
        self.shared.set_state(PeerState::ShuttingDown).await;
        let _ = self.shared.shutdown.send(true);

        {
            let mut tracker = self.shared.tracker.lock().await;
            if let Err(e) = tracker.leave().await {
                tracing::debug!("LEAVE not delivered: {e}");
            }
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for (name, handle) in tasks {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("{name} task panicked: {e}"),
                Err(_) => tracing::warn!("{name} task did not finish within shutdown timeout"),
            }
        }

        tracing::info!("peer shut down");
    }
}

/// Fetches every known peer's chain and keeps the strictly longest fully
/// valid one. Ties keep the local (empty) chain; unreachable peers and
/// invalid chains are skipped.
async fn bootstrap_chain(peers: &[PeerAddr], difficulty: usize) -> Blockchain {
    let mut best = Blockchain::new(difficulty);

    for peer in peers {
        let fetched = tokio::time::timeout(BOOTSTRAP_FETCH_TIMEOUT, fetch_chain(peer.ip, peer.port)).await;
        let blocks = match fetched {
            Ok(Ok(blocks)) => blocks,
            Ok(Err(e)) => {
                tracing::warn!(peer = %peer, "chain fetch failed, skipping: {e}");
                continue;
            }
            Err(_) => {
                tracing::warn!(peer = %peer, "chain fetch timed out, skipping");
                continue;
            }
        };

        if blocks.len() <= best.len() {
            continue;
        }
        match Blockchain::from_validated(blocks, difficulty) {
            Some(remote) if remote.len() > best.len() => {
                tracing::info!(peer = %peer, height = remote.len(), "adopting longer chain");
                best = remote;
            }
            Some(_) => {}
            None => tracing::warn!(peer = %peer, "fetched chain failed validation, abandoned"),
        }
    }

    best
}

/// Connects with the standard outbound timeout.
pub(crate) async fn connect_timeout(ip: IpAddr, port: u16) -> std::io::Result<TcpStream> {
    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((ip, port))).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "connect timed out",
        )),
    }
}

/// Streams a remote peer's whole chain: sends `GET-CHAIN`, then collects
/// `BLOCK` frames until the `id = -1` sentinel.
pub(crate) async fn fetch_chain(ip: IpAddr, port: u16) -> Result<Vec<Block>, WireError> {
    let stream = connect_timeout(ip, port).await?;
    let mut frame = FrameReader::new(stream);
    wire::write_get_chain(frame.get_mut()).await?;

    let mut blocks = Vec::new();
    loop {
        match wire::read_peer_request(&mut frame).await? {
            Some(PeerRequest::Block { block, .. }) => {
                if block.is_end_of_chain() {
                    return Ok(blocks);
                }
                blocks.push(block);
            }
            Some(PeerRequest::GetChain) => {
                return Err(WireError::MalformedHeader(
                    "GET-CHAIN inside a chain transfer".to_string(),
                ));
            }
            None => return Err(WireError::UnexpectedEof),
        }
    }
}

/// Best-effort fan-out of a freshly mined block to every tracker-listed
/// peer, honoring the broadcast-suppression and tamper settings.
pub(crate) async fn broadcast_block(shared: &Shared, block: &Block, mined_count: u64) {
    if !tamper::should_broadcast(&shared.config.faults, mined_count) {
        tracing::info!(id = block.id, "broadcast suppressed by broadcast_freq");
        return;
    }

    let mut outgoing = block.clone();
    if tamper::should_tamper(&shared.config.faults, mined_count) {
        if shared.config.faults.tamper_type == TamperType::Chain {
            let mut chain = shared.chain.lock().await;
            if let Some(index) = tamper::corrupt_history(&mut chain) {
                tracing::warn!(index, "tamper: corrupted a historical local block");
            }
        } else {
            tamper::corrupt_outgoing(shared.config.faults.tamper_type, &mut outgoing);
            tracing::warn!(id = block.id, "tamper: corrupted outgoing broadcast");
        }
    }

    let peers = {
        let mut tracker = shared.tracker.lock().await;
        match tracker.list(shared.identity.peer_id()).await {
            Ok(peers) => peers,
            Err(e) => {
                tracing::warn!("cannot list peers for broadcast: {e}");
                return;
            }
        }
    };

    let mut delivered = 0usize;
    for peer in &peers {
        match send_block_to(peer, &outgoing).await {
            Ok(()) => delivered += 1,
            Err(e) => tracing::debug!(peer = %peer, "broadcast skipped: {e}"),
        }
    }

    if delivered > 0 {
        shared.metrics.node.blocks_broadcast.inc();
    }
    tracing::info!(id = block.id, delivered, total = peers.len(), "broadcast done");
}

/// Delivers one block to one peer: connect, send, close.
async fn send_block_to(peer: &PeerAddr, block: &Block) -> Result<(), WireError> {
    let mut stream = connect_timeout(peer.ip, peer.port).await?;
    wire::write_block(&mut stream, block, FrameTag::Block).await?;
    Ok(())
}
