#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod adapter;
pub use adapter::{Armed, AsyncAdapter, DeletionWatch};

mod codec;
pub use codec::{Candidate, SEQUENCE_SEPARATOR, rank, ranked};

mod election;
pub use election::{ElectionConfig, ElectionHandle, elect_leader};

pub mod memory;
pub use memory::{MemoryService, MemorySession};

mod traits;
pub use traits::{Callback, CoordinationClient, StateStream, Watcher};

mod types;
pub use types::{
    ClientError, ConnectionState, ElectionError, ElectionEvent, ElectionState, NodeEvent, NodeStat,
    Rank,
};

mod watchdog;
pub use watchdog::{Cleanup, Tenure, Watchdog};
