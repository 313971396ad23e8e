//! Testing utilities and mock implementations
//!
//! Lets the live data service be exercised without a broker.

pub mod mocks;

pub use mocks::*;
