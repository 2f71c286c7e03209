//! # Summary
//!
//! This module abstracts over connections to peer nodes.
//!
//! Frames are delimited by `tokio-util`'s length-delimited codec on top of
//! `tokio`'s TCP stream halves. Frame payloads are either the bincode encoded
//! handshake or a text encoded protocol message.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::error::{Error, Result};

const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

pub struct Rx(FramedRead<OwnedReadHalf, LengthDelimitedCodec>);
pub struct Tx(FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>);

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

pub fn split(stream: TcpStream) -> (Rx, Tx) {
    let (rx, tx) = stream.into_split();
    (Rx(FramedRead::new(rx, codec())), Tx(FramedWrite::new(tx, codec())))
}

impl Rx {
    /// Next frame, or `None` once the peer hangs up.
    pub async fn recv(&mut self) -> Option<Result<Vec<u8>>> {
        self.0
            .next()
            .await
            .map(|frame| frame.map(|frame| frame.to_vec()).map_err(Error::from))
    }

    pub async fn recv_bincode<T: DeserializeOwned>(&mut self) -> Result<T> {
        match self.recv().await {
        | Some(frame) => Ok(bincode::deserialize(&frame?)?),
        | None => Err(Error::Shutdown),
        }
    }
}

impl Tx {
    pub async fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        self.0.send(Bytes::from(frame)).await?;
        Ok(())
    }

    pub async fn send_bincode<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let frame = bincode::serialize(message)?;
        self.send(frame).await
    }
}
