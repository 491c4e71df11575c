use serde::{Deserialize, Serialize};

/// Result of a client-facing KV operation, as carried back over the wire.
///
/// `WrongLeader` and `NotApplied` are not failures in the `std::error::Error`
/// sense for the server — they are part of the normal retry protocol — but
/// they implement `Error` so a `Clerk` can match on them uniformly with
/// transport failures.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvError {
    #[error("not the leader")]
    WrongLeader,
    #[error("operation not applied before timeout")]
    NotApplied,
}

/// Internal invariant violations. These are fatal: the caller logs the error
/// and aborts rather than trying to recover.
#[derive(thiserror::Error, Debug)]
pub enum RaftError {
    #[error("failed to decode persisted raft state: {0}")]
    PersistDecode(String),
    #[error("log index {index} is below first_index {first_index}")]
    BelowFirstIndex { index: u64, first_index: u64 },
}
