//! Communication plumbing: backends, wire records and the point-to-point
//! and collective exchanges built on them.

pub mod collective;
pub mod communicator;
pub mod exchange;
pub mod wire;

pub use collective::{all_gather_bytes, all_gather_u64, broadcast_bytes};
pub use exchange::exchange_bytes;
