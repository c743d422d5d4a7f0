//! Muxnet - Multiplexing TCP server core
//!
//! Frames, checksums, and dispatches binary messages to pluggable
//! application protocols. A listening port hosts either several protocols
//! multiplexed by a leading identifier byte in the first frame, or exactly
//! one protocol that speaks first and owns the socket from accept.
//!
//! Applications implement [`network::Protocol`] and register a
//! [`network::ProtocolService`] on a port through a
//! [`network::ServerRegistry`]; the core takes care of partial-read
//! reassembly, header validation, Adler-32 checksums, bounded read
//! timeouts and protocol selection.

pub mod config;
pub mod network;
pub mod protocol;
