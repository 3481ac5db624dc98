//! Shared constants and the network selector.

pub mod network;
pub mod paths;

pub use network::Network;
