use serde::{Deserialize, Serialize};

pub mod address;
pub mod cluster;
pub mod message;
pub mod raft;
pub mod state_machine;
pub mod storage;

pub use address::Address;

/// One entry in the replicated log: the term it was appended under, the raw
/// command string, and the result the state machine produced for it once
/// applied (empty until then).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub command: String,
    #[serde(default)]
    pub value: String,
}
