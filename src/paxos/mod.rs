//! # Summary
//!
//! Single-decree Paxos, split into its three roles. Each role handles one
//! event at a time through a borrowed `Context` and never blocks; timers are
//! plain deadlines that the owner of the role polls with `on_timeout`.

mod acceptor;
mod learner;
mod message;
mod proposer;

pub use self::acceptor::{Acceptor, AcceptorState};
pub use self::learner::Learner;
pub use self::message::PaxosMessage;
pub use self::proposer::Proposer;
