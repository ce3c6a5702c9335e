//! Metric buffering: the in-memory passive-mode ring and the durable
//! offline store with its replay contract.

pub mod local;
pub mod offline;
pub mod store;

pub use local::LocalBuffer;
pub use offline::OfflineBuffer;
pub use store::BufferStore;
