//! Protocol module - Defines the wire format for framed messages
//!
//! Every frame carries a fixed binary header followed by the body:
//! - 2 bytes body length (little-endian)
//! - 4 bytes Adler-32 checksum of the body (little-endian)
//! - Variable length body
//!
//! The first frame on a multiplexed connection additionally carries the
//! protocol identifier as its first body byte.

mod message;
mod codec;

pub use message::*;
pub use codec::*;

/// Maximum size of one frame on the wire, header included
pub const MAX_FRAME_SIZE: usize = 65535;

/// Frame header size: length(2) + checksum(4)
pub const HEADER_SIZE: usize = 6;

/// Maximum number of body bytes in a single frame
pub const MAX_BODY_SIZE: usize = MAX_FRAME_SIZE - HEADER_SIZE;
