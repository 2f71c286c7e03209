//! # Summary
//!
//! Messages exchanged by the log's Paxos roles. Every message names the
//! log position it concerns and the node that sent it.

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
const LEARN_VALUE: u8 = b'8';
const LEARN_PROPOSAL: u8 = b'9';
const REQUEST_CHOSEN: u8 = b'0';

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaxosMessage {
    PrepareRequest {
        paxos_id: PaxosId,
        node_id: NodeId,
        proposal_id: ProposalId,
    },
    PrepareRejected {
        paxos_id: PaxosId,
        node_id: NodeId,
        proposal_id: ProposalId,
        /// Highest promise of the rejecting acceptor, so the proposer can leapfrog it
        promised_proposal_id: ProposalId,
    },
    PreviouslyAccepted {
        paxos_id: PaxosId,
        node_id: NodeId,
        proposal_id: ProposalId,
        accepted_proposal_id: ProposalId,
        value: Vec<u8>,
    },
    CurrentlyOpen {
        paxos_id: PaxosId,
        node_id: NodeId,
        proposal_id: ProposalId,
    },
    ProposeRequest {
        paxos_id: PaxosId,
        node_id: NodeId,
        proposal_id: ProposalId,
        value: Vec<u8>,
    },
    ProposeRejected {
        paxos_id: PaxosId,
        node_id: NodeId,
        proposal_id: ProposalId,
    },
    ProposeAccepted {
        paxos_id: PaxosId,
        node_id: NodeId,
        proposal_id: ProposalId,
    },
    /// The chosen value itself, used for catch-up and replies to lagging nodes.
    LearnValue {
        paxos_id: PaxosId,
        node_id: NodeId,
        run_id: u64,
        value: Vec<u8>,
    },
    /// Names the chosen proposal; receivers that accepted it already hold the value.
    LearnProposal {
        paxos_id: PaxosId,
        node_id: NodeId,
        proposal_id: ProposalId,
    },
    RequestChosen {
        paxos_id: PaxosId,
        node_id: NodeId,
    },
}

impl PaxosMessage {
    pub fn paxos_id(&self) -> PaxosId {
        match self {
        | PaxosMessage::PrepareRequest { paxos_id, .. }
        | PaxosMessage::PrepareRejected { paxos_id, .. }
        | PaxosMessage::PreviouslyAccepted { paxos_id, .. }
        | PaxosMessage::CurrentlyOpen { paxos_id, .. }
        | PaxosMessage::ProposeRequest { paxos_id, .. }
        | PaxosMessage::ProposeRejected { paxos_id, .. }
        | PaxosMessage::ProposeAccepted { paxos_id, .. }
        | PaxosMessage::LearnValue { paxos_id, .. }
        | PaxosMessage::LearnProposal { paxos_id, .. }
        | PaxosMessage::RequestChosen { paxos_id, .. } => *paxos_id,
        }
    }

    pub fn node_id(&self) -> NodeId {
        match self {
        | PaxosMessage::PrepareRequest { node_id, .. }
        | PaxosMessage::PrepareRejected { node_id, .. }
        | PaxosMessage::PreviouslyAccepted { node_id, .. }
        | PaxosMessage::CurrentlyOpen { node_id, .. }
        | PaxosMessage::ProposeRequest { node_id, .. }
        | PaxosMessage::ProposeRejected { node_id, .. }
        | PaxosMessage::ProposeAccepted { node_id, .. }
        | PaxosMessage::LearnValue { node_id, .. }
        | PaxosMessage::LearnProposal { node_id, .. }
        | PaxosMessage::RequestChosen { node_id, .. } => *node_id,
        }
    }

    /// Whether this message announces a chosen value.
    pub fn is_learn(&self) -> bool {
        match self {
        | PaxosMessage::LearnValue { .. }
        | PaxosMessage::LearnProposal { .. } => true,
        | _ => false,
        }
    }

    pub(crate) fn write(&self, buffer: Vec<u8>) -> Vec<u8> {
        let writer = match self {
        | PaxosMessage::PrepareRequest { paxos_id, node_id, proposal_id } => {
            Writer::append_to(buffer, PREPARE_REQUEST)
                .number(*paxos_id)
                .number(*node_id)
                .number(proposal_id.raw())
        }
        | PaxosMessage::PrepareRejected { paxos_id, node_id, proposal_id, promised_proposal_id } => {
            Writer::append_to(buffer, PREPARE_REJECTED)
                .number(*paxos_id)
                .number(*node_id)
                .number(proposal_id.raw())
                .number(promised_proposal_id.raw())
        }
        | PaxosMessage::PreviouslyAccepted { paxos_id, node_id, proposal_id, accepted_proposal_id, value } => {
            Writer::append_to(buffer, PREPARE_PREVIOUSLY_ACCEPTED)
                .number(*paxos_id)
                .number(*node_id)
                .number(proposal_id.raw())
                .number(accepted_proposal_id.raw())
                .value(value)
        }
        | PaxosMessage::CurrentlyOpen { paxos_id, node_id, proposal_id } => {
            Writer::append_to(buffer, PREPARE_CURRENTLY_OPEN)
                .number(*paxos_id)
                .number(*node_id)
                .number(proposal_id.raw())
        }
        | PaxosMessage::ProposeRequest { paxos_id, node_id, proposal_id, value } => {
            Writer::append_to(buffer, PROPOSE_REQUEST)
                .number(*paxos_id)
                .number(*node_id)
                .number(proposal_id.raw())
                .value(value)
        }
        | PaxosMessage::ProposeRejected { paxos_id, node_id, proposal_id } => {
            Writer::append_to(buffer, PROPOSE_REJECTED)
                .number(*paxos_id)
                .number(*node_id)
                .number(proposal_id.raw())
        }
        | PaxosMessage::ProposeAccepted { paxos_id, node_id, proposal_id } => {
            Writer::append_to(buffer, PROPOSE_ACCEPTED)
                .number(*paxos_id)
                .number(*node_id)
                .number(proposal_id.raw())
        }
        | PaxosMessage::LearnValue { paxos_id, node_id, run_id, value } => {
            Writer::append_to(buffer, LEARN_VALUE)
                .number(*paxos_id)
                .number(*node_id)
                .number(*run_id)
                .value(value)
        }
        | PaxosMessage::LearnProposal { paxos_id, node_id, proposal_id } => {
            Writer::append_to(buffer, LEARN_PROPOSAL)
                .number(*paxos_id)
                .number(*node_id)
                .number(proposal_id.raw())
        }
        | PaxosMessage::RequestChosen { paxos_id, node_id } => {
            Writer::append_to(buffer, REQUEST_CHOSEN)
                .number(*paxos_id)
                .number(*node_id)
        }
        };
        writer.finish()
    }

    pub(crate) fn read(reader: &mut Reader) -> Result<Self> {
        let tag = reader.tag()?;
        let paxos_id = reader.number()?;
        let node_id = reader.number()?;
        let message = match tag {
        | PREPARE_REQUEST => PaxosMessage::PrepareRequest {
            paxos_id,
            node_id,
            proposal_id: reader.proposal_id()?,
        },
        | PREPARE_REJECTED => PaxosMessage::PrepareRejected {
            paxos_id,
            node_id,
            proposal_id: reader.proposal_id()?,
            promised_proposal_id: reader.proposal_id()?,
        },
        | PREPARE_PREVIOUSLY_ACCEPTED => PaxosMessage::PreviouslyAccepted {
            paxos_id,
            node_id,
            proposal_id: reader.proposal_id()?,
            accepted_proposal_id: reader.proposal_id()?,
            value: reader.value()?,
        },
        | PREPARE_CURRENTLY_OPEN => PaxosMessage::CurrentlyOpen {
            paxos_id,
            node_id,
            proposal_id: reader.proposal_id()?,
        },
        | PROPOSE_REQUEST => PaxosMessage::ProposeRequest {
            paxos_id,
            node_id,
            proposal_id: reader.proposal_id()?,
            value: reader.value()?,
        },
        | PROPOSE_REJECTED => PaxosMessage::ProposeRejected {
            paxos_id,
            node_id,
            proposal_id: reader.proposal_id()?,
        },
        | PROPOSE_ACCEPTED => PaxosMessage::ProposeAccepted {
            paxos_id,
            node_id,
            proposal_id: reader.proposal_id()?,
        },
        | LEARN_VALUE => PaxosMessage::LearnValue {
            paxos_id,
            node_id,
            run_id: reader.number()?,
            value: reader.value()?,
        },
        | LEARN_PROPOSAL => PaxosMessage::LearnProposal {
            paxos_id,
            node_id,
            proposal_id: reader.proposal_id()?,
        },
        | REQUEST_CHOSEN => PaxosMessage::RequestChosen { paxos_id, node_id },
        | other => return Err(Error::decode(format!("unknown paxos message type {:?}", other as char))),
        };
        Ok(message)
    }
}
