//! Single-master asynchronous replication: the master-side slave registry
//! and fan-out, and the replica-side handshake client and stream loop.

pub mod master;
pub mod replica;
