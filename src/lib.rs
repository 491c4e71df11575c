pub mod clerk;
pub mod config;
pub mod error;
pub mod kvserver;
pub mod persist;
pub mod raft;
pub mod transport;
