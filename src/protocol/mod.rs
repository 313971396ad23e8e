//! Wire-level protocol: frames and the device topic scheme

pub mod frames;
pub mod topics;

pub use frames::*;
pub use topics::*;
