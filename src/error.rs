use crate::identity::NodeId;

/// Failures surfaced to callers of the replication core.
///
/// Protocol-level rejections are ordinary messages and never appear here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed message: {0}")]
    Decode(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failure: {0}")]
    Serialize(#[from] bincode::Error),

    #[error("storage commit failed")]
    CommitFailed,

    #[error("lease is held by node {owner}")]
    NotLeaseOwner { owner: NodeId },

    #[error("cannot append an empty value")]
    EmptyValue,

    #[error("replication runtime has shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn decode<S: Into<String>>(reason: S) -> Self {
        Error::Decode(reason.into())
    }
}
