//! # Summary
//!
//! Envelope multiplexing the log protocol and the lease protocol over one
//! connection. The first field names the protocol:
//!
//! ```text
//! P:<paxos message>
//! L:<lease message>
//! ```

use crate::codec::Reader;
use crate::error::{Error, Result};
use crate::lease::LeaseMessage;
use crate::paxos::PaxosMessage;

const PAXOS: &[u8] = b"P:";
const LEASE: &[u8] = b"L:";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Paxos(PaxosMessage),
    Lease(LeaseMessage),
}

impl Message {
    pub fn encode(&self) -> Vec<u8> {
        match self {
        | Message::Paxos(message) => message.write(PAXOS.to_vec()),
        | Message::Lease(message) => message.write(LEASE.to_vec()),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(Error::decode("message too short"))
        }
        let (prefix, body) = bytes.split_at(2);
        let mut reader = Reader::new(body);
        let message = match prefix {
        | PAXOS => Message::Paxos(PaxosMessage::read(&mut reader)?),
        | LEASE => Message::Lease(LeaseMessage::read(&mut reader)?),
        | _ => return Err(Error::decode(format!("unknown protocol {:?}", String::from_utf8_lossy(prefix)))),
        };
        reader.finish()?;
        Ok(message)
    }
}

impl From<PaxosMessage> for Message {
    fn from(message: PaxosMessage) -> Self {
        Message::Paxos(message)
    }
}

impl From<LeaseMessage> for Message {
    fn from(message: LeaseMessage) -> Self {
        Message::Lease(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ProposalId;

    #[test]
    fn paxos_wire_format() {
        let message = Message::from(PaxosMessage::ProposeRequest {
            paxos_id: 4,
            node_id: 1,
            proposal_id: ProposalId::from_raw(4294967297),
            value: b"set:x".to_vec(),
        });
        let bytes = message.encode();
        assert_eq!(bytes, b"P:5:4:1:4294967297:5:set:x".to_vec());
        assert_eq!(Message::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn lease_wire_format() {
        let message = Message::from(LeaseMessage::LearnChosen {
            node_id: 2,
            lease_owner: 2,
            duration: 6500,
            local_expire_time: 17000,
            paxos_id: 9,
        });
        let bytes = message.encode();
        assert_eq!(bytes, b"L:8:2:2:6500:17000:9".to_vec());
        assert_eq!(Message::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn request_chosen_uses_zero_tag() {
        let message = Message::from(PaxosMessage::RequestChosen { paxos_id: 0, node_id: 3 });
        assert_eq!(message.encode(), b"P:0:0:3".to_vec());
    }

    #[test]
    fn binary_values_survive() {
        let value: Vec<u8> = (0..=255).collect();
        let message = Message::from(PaxosMessage::LearnValue {
            paxos_id: 1,
            node_id: 0,
            run_id: 2,
            value,
        });
        assert_eq!(Message::decode(&message.encode()).unwrap(), message);
    }

    #[test]
    fn rejects_garbage() {
        assert!(Message::decode(b"").is_err());
        assert!(Message::decode(b"X:1:0:0:0").is_err());
        assert!(Message::decode(b"P:z:0:0").is_err());
        assert!(Message::decode(b"L:1:0").is_err());
        assert!(Message::decode(b"P:0:0:3:").is_err());
        assert!(Message::decode(b"P:0:0:3:4").is_err());
    }
}
