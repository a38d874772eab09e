//! Line-oriented TCP control protocol: chip type, latest frame and register
//! access for remote tools.

pub mod protocol;
pub mod server;
