//! Server implementations
//!
//! - proxy: sits in front of a game server and drops clients that flood it
pub mod proxy;
