//! Error types for the epoching crate
//!
//! Recoverable conditions are surfaced through [`Error`]; invariant
//! violations (missing current-epoch record, missing total voting power,
//! boundary-only operations invoked off-boundary where no caller can
//! legitimately do so) panic instead, because continuing would risk
//! state divergence across nodes.

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by epoching operations
#[derive(Debug, Error)]
pub enum Error {
    /// The requested epoch has no record in the store
    #[error("epoch {0} is not known in the store")]
    UnknownEpoch(u64),

    /// The validator was not part of the epoch's snapshot
    #[error("validator {validator} is not in the validator set of epoch {epoch}")]
    ValidatorNotFound {
        /// Epoch whose snapshot was consulted
        epoch: u64,
        /// Hex-encoded validator address
        validator: String,
    },

    /// A height-scoped operation was invoked with an invalid height
    #[error("invalid height: {0}")]
    InvalidHeight(String),

    /// A Merkle proof or its inputs failed validation
    #[error("invalid proof: {0}")]
    InvalidProof(String),

    /// A queued message payload failed validation
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Encoding or decoding of a stored value failed
    #[error("codec error: {0}")]
    Codec(String),

    /// The staking collaborator rejected a forwarded message
    #[error("staking error: {0}")]
    Staking(String),

    /// The supplied configuration is unusable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Shorthand for a codec error from a bincode failure
    pub(crate) fn codec(err: bincode::Error) -> Self {
        Error::Codec(err.to_string())
    }
}
