//! # Summary
//!
//! Runs a `Node` on the `tokio` runtime over TCP.
//!
//! A single driver task owns the node and multiplexes inbound frames, local
//! requests and the node's next timer. Peer tasks shuttle frames between
//! sockets and the `Shared` hub. Each pair of nodes keeps one connection,
//! dialed by the node with the larger ID and re-dialed whenever it drops.
//!
//! Storage is synchronous here, so every commit is complete by the time the
//! node sees its result.

mod peer;
mod shared;
mod socket;

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::{NodeId, PaxosId};
use crate::lease::LeaseStatus;
use crate::node::Node;
use crate::replicated::{Chosen, ReplicationStats};
use crate::storage::Storage;

pub use self::peer::Handshake;
pub use self::shared::{HubTransport, Shared};

/// Milliseconds elapsed since the runtime started.
#[derive(Copy, Clone, Debug)]
struct Clock(Instant);

impl Clock {
    fn now(&self) -> u64 {
        self.0.elapsed().as_millis() as u64
    }

    fn instant(&self, deadline: u64) -> Instant {
        self.0 + std::time::Duration::from_millis(deadline)
    }
}

/// Snapshot of a running node.
#[derive(Clone, Debug)]
pub struct Status {
    pub paxos_id: PaxosId,
    pub lease: LeaseStatus,
    pub stats: ReplicationStats,
}

#[derive(Debug)]
enum Request {
    Append(Vec<u8>, oneshot::Sender<Result<()>>),
    AcquireLease,
    Status(oneshot::Sender<Status>),
}

/// Client side of a running node. Dropping it stops the driver.
pub struct Handle {
    id: NodeId,
    local_addr: SocketAddr,
    requests: mpsc::UnboundedSender<Request>,
    chosen: mpsc::UnboundedReceiver<Chosen>,
}

impl Handle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queues `value` for replication on this node.
    pub async fn append(&self, value: Vec<u8>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Append(value, tx))
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)?
    }

    pub fn acquire_lease(&self) -> Result<()> {
        self.requests
            .send(Request::AcquireLease)
            .map_err(|_| Error::Shutdown)
    }

    pub async fn status(&self) -> Result<Status> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Status(tx))
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Next value chosen by the cluster, in log order.
    pub async fn next_chosen(&mut self) -> Option<Chosen> {
        self.chosen.recv().await
    }
}

/// Binds the node's port, connects to its peers and starts the driver.
pub async fn spawn<S: Storage + 'static>(config: Config, storage: S) -> Result<Handle> {
    let id = config.id();
    let listener = TcpListener::bind(config.address(id)).await?;
    let local_addr = listener.local_addr()?;
    info!("node {} listening on {}", id, local_addr);

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (chosen_tx, chosen_rx) = mpsc::unbounded_channel();
    let shared = Shared::new(id, inbound_tx);

    let clock = Clock(Instant::now());
    let quorum = Box::new(config.majority_quorum());
    let node = Node::open(config.clone(), quorum, HubTransport(shared.clone()), storage, clock.now())?;

    tokio::spawn(listen(listener, shared.clone()));
    for peer_id in config.peers().filter(|peer_id| *peer_id < id) {
        tokio::spawn(dial(config.clone(), peer_id, shared.clone()));
    }

    let driver = Driver {
        node,
        clock,
        inbound: inbound_rx,
        requests: request_rx,
        chosen: chosen_tx,
    };
    tokio::spawn(driver.run());

    Ok(Handle {
        id,
        local_addr,
        requests: request_tx,
        chosen: chosen_rx,
    })
}

async fn listen(listener: TcpListener, shared: Shared) {
    loop {
        match listener.accept().await {
        | Ok((stream, addr)) => {
            trace!("accepted connection from {}", addr);
            let shared = shared.clone();
            tokio::spawn(async move {
                if let Err(error) = peer::accept(stream, shared).await {
                    debug!("inbound connection failed: {}", error);
                }
            });
        }
        | Err(error) => warn!("failed to accept connection: {}", error),
        }
    }
}

/// Keeps a connection to `peer_id` open for as long as the hub lives.
async fn dial(config: Config, peer_id: NodeId, shared: Shared) {
    let mut interval = time::interval(config.reconnect_interval());
    loop {
        interval.tick().await;
        if shared.read().is_connected(peer_id) {
            continue
        }
        let stream = match TcpStream::connect(config.address(peer_id)).await {
        | Ok(stream) => stream,
        | Err(error) => {
            trace!("failed to reach {}: {}", peer_id, error);
            continue
        }
        };
        if let Err(error) = peer::connect(config.id(), peer_id, stream, shared.clone()).await {
            debug!("connection to {} failed: {}", peer_id, error);
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
    | Some(deadline) => time::sleep_until(deadline).await,
    | None => futures::future::pending::<()>().await,
    }
}

struct Driver<S: Storage> {
    node: Node<HubTransport, S>,
    clock: Clock,
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    requests: mpsc::UnboundedReceiver<Request>,
    chosen: mpsc::UnboundedSender<Chosen>,
}

impl<S: Storage> Driver<S> {
    async fn run(mut self) {
        loop {
            let deadline = self.node.next_deadline().map(|deadline| self.clock.instant(deadline));
            tokio::select! {
                Some(frame) = self.inbound.recv() => {
                    self.node.on_bytes(self.clock.now(), &frame);
                }
                request = self.requests.recv() => match request {
                | Some(request) => self.on_request(request),
                | None => {
                    info!("handle dropped, stopping node {}", self.node.identity().node_id());
                    return
                }
                },
                () = sleep_until(deadline) => {
                    self.node.on_timeout(self.clock.now());
                }
            }
            for chosen in self.node.take_chosen() {
                // Consumer may have stopped listening
                self.chosen.send(chosen).ok();
            }
            for event in self.node.take_lease_events() {
                debug!("lease event {:?}", event);
            }
        }
    }

    fn on_request(&mut self, request: Request) {
        let now = self.clock.now();
        match request {
        | Request::Append(value, tx) => {
            tx.send(self.node.append(now, value)).ok();
        }
        | Request::AcquireLease => self.node.acquire_lease(now),
        | Request::Status(tx) => {
            tx.send(Status {
                paxos_id: self.node.paxos_id(),
                lease: self.node.lease_status(now),
                stats: self.node.stats().clone(),
            })
            .ok();
        }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::storage::FileStorage;

    #[tokio::test]
    async fn single_node_chooses_appended_values() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(0, 1)
            .with_base_port(0)
            .with_data_dir(dir.path())
            .with_max_lease_time(Duration::from_millis(1000))
            .with_acquire_lease_timeout(Duration::from_millis(200));
        let storage = FileStorage::open(config.storage_path()).unwrap();
        let mut handle = spawn(config, storage).await.unwrap();

        handle.append(b"first".to_vec()).await.unwrap();
        handle.append(b"second".to_vec()).await.unwrap();

        let mut values = Vec::new();
        while values.len() < 2 {
            let chosen = time::timeout(Duration::from_secs(10), handle.next_chosen())
                .await
                .unwrap()
                .unwrap();
            assert!(chosen.own);
            values.push(chosen.value);
        }
        assert_eq!(values, vec![b"first".to_vec(), b"second".to_vec()]);

        let status = handle.status().await.unwrap();
        assert_eq!(status.paxos_id, 2);
        assert_eq!(status.lease.owner, Some(0));
        assert_eq!(status.stats.chosen(), 2);
    }
}
