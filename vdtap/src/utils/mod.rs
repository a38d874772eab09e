//! Supporting infrastructure.
//!
//! Error types for every layer of the crate and the sample buffer pool shared
//! by the transfer worker and its consumer.

pub mod buffer_pool;
pub mod errors;
