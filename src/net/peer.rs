use serde_derive::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::identity::NodeId;
use crate::net::shared::{Rx, Shared};
use crate::net::socket;

/// First frame on every connection, sent by the dialing node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Handshake {
    Ping(NodeId),
}

/// Completes an inbound connection once the remote node names itself.
pub async fn accept(stream: TcpStream, shared: Shared) -> Result<()> {
    let (mut peer_rx, peer_tx) = socket::split(stream);
    let handshake: Handshake = peer_rx.recv_bincode().await?;
    let Handshake::Ping(peer_id) = handshake;
    Peer::new(peer_id, peer_rx, peer_tx, shared).run().await
}

/// Dials `peer_id` and introduces this node.
pub async fn connect(self_id: NodeId, peer_id: NodeId, stream: TcpStream, shared: Shared) -> Result<()> {
    let (peer_rx, mut peer_tx) = socket::split(stream);
    peer_tx.send_bincode(&Handshake::Ping(self_id)).await?;
    Peer::new(peer_id, peer_rx, peer_tx, shared).run().await
}

/// Forwards frames between one remote node and the hub.
struct Peer {
    peer_id: NodeId,
    generation: u64,
    rx: Rx<Vec<u8>>,
    peer_rx: socket::Rx,
    peer_tx: socket::Tx,
    shared: Shared,
}

impl Peer {
    fn new(peer_id: NodeId, peer_rx: socket::Rx, peer_tx: socket::Tx, shared: Shared) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = shared.write().connect_peer(peer_id, tx);
        info!("connected to {}", peer_id);
        Peer {
            peer_id,
            generation,
            rx,
            peer_rx,
            peer_tx,
            shared,
        }
    }

    async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                frame = self.peer_rx.recv() => match frame {
                | Some(frame) => {
                    let frame = frame?;
                    self.shared.read().deliver(frame);
                }
                | None => return Ok(()),
                },
                frame = self.rx.recv() => match frame {
                | Some(frame) => self.peer_tx.send(frame).await?,
                | None => return Ok(()),
                },
            }
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        info!("disconnected from {}", self.peer_id);
        self.shared.write().disconnect_peer(self.peer_id, self.generation);
    }
}
