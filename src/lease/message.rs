//! # Summary
//!
//! Messages of the lease protocol. Durations are relative milliseconds, so
//! nodes never compare each other's clocks.

use crate::codec::{Reader, Writer};
use crate::error::{Error, Result};
use crate::identity::{NodeId, PaxosId, ProposalId};

const PREPARE_REQUEST: u8 = b'1';
const PREPARE_REJECTED: u8 = b'2';
const PREPARE_PREVIOUSLY_ACCEPTED: u8 = b'3';
const PREPARE_CURRENTLY_OPEN: u8 = b'4';
const PROPOSE_REQUEST: u8 = b'5';
const PROPOSE_REJECTED: u8 = b'6';
const PROPOSE_ACCEPTED: u8 = b'7';
const LEARN_CHOSEN: u8 = b'8';

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaseMessage {
    PrepareRequest {
        node_id: NodeId,
        proposal_id: ProposalId,
        /// Log position of the candidate
        paxos_id: PaxosId,
    },
    PrepareRejected {
        node_id: NodeId,
        proposal_id: ProposalId,
    },
    PreviouslyAccepted {
        node_id: NodeId,
        proposal_id: ProposalId,
        accepted_proposal_id: ProposalId,
        lease_owner: NodeId,
        duration: u64,
    },
    CurrentlyOpen {
        node_id: NodeId,
        proposal_id: ProposalId,
    },
    ProposeRequest {
        node_id: NodeId,
        proposal_id: ProposalId,
        lease_owner: NodeId,
        duration: u64,
    },
    ProposeRejected {
        node_id: NodeId,
        proposal_id: ProposalId,
    },
    ProposeAccepted {
        node_id: NodeId,
        proposal_id: ProposalId,
    },
    LearnChosen {
        node_id: NodeId,
        lease_owner: NodeId,
        /// Remaining lease time when the message was sent
        duration: u64,
        /// Expiry on the owner's clock, only meaningful to the owner
        local_expire_time: u64,
        /// Log position of the owner
        paxos_id: PaxosId,
    },
}

impl LeaseMessage {
    pub fn node_id(&self) -> NodeId {
        match self {
        | LeaseMessage::PrepareRequest { node_id, .. }
        | LeaseMessage::PrepareRejected { node_id, .. }
        | LeaseMessage::PreviouslyAccepted { node_id, .. }
        | LeaseMessage::CurrentlyOpen { node_id, .. }
        | LeaseMessage::ProposeRequest { node_id, .. }
        | LeaseMessage::ProposeRejected { node_id, .. }
        | LeaseMessage::ProposeAccepted { node_id, .. }
        | LeaseMessage::LearnChosen { node_id, .. } => *node_id,
        }
    }

    pub(crate) fn write(&self, buffer: Vec<u8>) -> Vec<u8> {
        let writer = match self {
        | LeaseMessage::PrepareRequest { node_id, proposal_id, paxos_id } => {
            Writer::append_to(buffer, PREPARE_REQUEST)
                .number(*node_id)
                .number(proposal_id.raw())
                .number(*paxos_id)
        }
        | LeaseMessage::PrepareRejected { node_id, proposal_id } => {
            Writer::append_to(buffer, PREPARE_REJECTED)
                .number(*node_id)
                .number(proposal_id.raw())
        }
        | LeaseMessage::PreviouslyAccepted { node_id, proposal_id, accepted_proposal_id, lease_owner, duration } => {
            Writer::append_to(buffer, PREPARE_PREVIOUSLY_ACCEPTED)
                .number(*node_id)
                .number(proposal_id.raw())
                .number(accepted_proposal_id.raw())
                .number(*lease_owner)
                .number(*duration)
        }
        | LeaseMessage::CurrentlyOpen { node_id, proposal_id } => {
            Writer::append_to(buffer, PREPARE_CURRENTLY_OPEN)
                .number(*node_id)
                .number(proposal_id.raw())
        }
        | LeaseMessage::ProposeRequest { node_id, proposal_id, lease_owner, duration } => {
            Writer::append_to(buffer, PROPOSE_REQUEST)
                .number(*node_id)
                .number(proposal_id.raw())
                .number(*lease_owner)
                .number(*duration)
        }
        | LeaseMessage::ProposeRejected { node_id, proposal_id } => {
            Writer::append_to(buffer, PROPOSE_REJECTED)
                .number(*node_id)
                .number(proposal_id.raw())
        }
        | LeaseMessage::ProposeAccepted { node_id, proposal_id } => {
            Writer::append_to(buffer, PROPOSE_ACCEPTED)
                .number(*node_id)
                .number(proposal_id.raw())
        }
        | LeaseMessage::LearnChosen { node_id, lease_owner, duration, local_expire_time, paxos_id } => {
            Writer::append_to(buffer, LEARN_CHOSEN)
                .number(*node_id)
                .number(*lease_owner)
                .number(*duration)
                .number(*local_expire_time)
                .number(*paxos_id)
        }
        };
        writer.finish()
    }

    pub(crate) fn read(reader: &mut Reader) -> Result<Self> {
        let tag = reader.tag()?;
        let node_id = reader.number()?;
        let message = match tag {
        | PREPARE_REQUEST => LeaseMessage::PrepareRequest {
            node_id,
            proposal_id: reader.proposal_id()?,
            paxos_id: reader.number()?,
        },
        | PREPARE_REJECTED => LeaseMessage::PrepareRejected {
            node_id,
            proposal_id: reader.proposal_id()?,
        },
        | PREPARE_PREVIOUSLY_ACCEPTED => LeaseMessage::PreviouslyAccepted {
            node_id,
            proposal_id: reader.proposal_id()?,
            accepted_proposal_id: reader.proposal_id()?,
            lease_owner: reader.number()?,
            duration: reader.number()?,
        },
        | PREPARE_CURRENTLY_OPEN => LeaseMessage::CurrentlyOpen {
            node_id,
            proposal_id: reader.proposal_id()?,
        },
        | PROPOSE_REQUEST => LeaseMessage::ProposeRequest {
            node_id,
            proposal_id: reader.proposal_id()?,
            lease_owner: reader.number()?,
            duration: reader.number()?,
        },
        | PROPOSE_REJECTED => LeaseMessage::ProposeRejected {
            node_id,
            proposal_id: reader.proposal_id()?,
        },
        | PROPOSE_ACCEPTED => LeaseMessage::ProposeAccepted {
            node_id,
            proposal_id: reader.proposal_id()?,
        },
        | LEARN_CHOSEN => LeaseMessage::LearnChosen {
            node_id,
            lease_owner: reader.number()?,
            duration: reader.number()?,
            local_expire_time: reader.number()?,
            paxos_id: reader.number()?,
        },
        | other => return Err(Error::decode(format!("unknown lease message type {:?}", other as char))),
        };
        Ok(message)
    }
}
