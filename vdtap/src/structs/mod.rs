//! Data structures shared by the device engine and the processing pipeline.
//!
//! Contains the channel assignment and status records reported by the
//! capture firmware, register addresses, raw frames and colour tables.

pub mod channels;
pub mod frame;
pub mod palette;
pub mod register;
pub mod status;
