//! Protocol trait definitions
//!
//! Application protocols implement `Protocol`; a `ProtocolService` is the
//! descriptor and factory that produces one protocol instance per connection.

use async_trait::async_trait;

use super::connection::ConnectionHandle;
use crate::protocol::Message;

/// Capability set implemented by every application protocol.
///
/// One instance exists per connection. Handlers run on the connection's own
/// task and the next read is only scheduled once a handler returns, so a
/// handler that never returns stalls its connection only.
#[async_trait]
pub trait Protocol: Send + Sync {
    /// Invoked once the instance is bound to a connection accepted by a
    /// speaks-first server
    async fn on_connect(&mut self) {}

    /// Invoked exactly once per connection with the first fully validated
    /// message. On a multiplexed port the protocol identifier byte has
    /// already been consumed from the body.
    async fn on_first_message(&mut self, message: Message);

    /// Invoked for every subsequent message
    async fn on_message(&mut self, message: Message);
}

/// Descriptor and factory for a protocol type.
///
/// One service value is shared across every connection speaking that
/// protocol; outbound sends go through the [`ConnectionHandle`] given to
/// [`make_protocol`](ProtocolService::make_protocol).
pub trait ProtocolService: Send + Sync {
    /// Human-readable label used in logs and error messages
    fn protocol_name(&self) -> &str;

    /// Identifier byte clients send as the first body byte of the first
    /// frame on a multiplexed port
    fn protocol_identifier(&self) -> u8;

    /// True if the server speaks first: the protocol owns its port
    /// exclusively, is bound at accept time, and the first frame carries no
    /// identifier byte
    fn server_sends_first(&self) -> bool {
        false
    }

    /// Whether checksum validation is enforced for this protocol
    fn is_checksummed(&self) -> bool {
        true
    }

    /// Construct a protocol instance bound to the given connection
    fn make_protocol(&self, handle: ConnectionHandle) -> Box<dyn Protocol>;
}
