//! Mesh transport that writes notifications to the log.
//!
//! The radio link is an external collaborator. Until one is attached, the server
//! logs every notification it would have sent under the `meshfence::mesh` target.

use meshfence_core::{Channel, MeshTransport, TransportError};
use tracing::info;

/// Logs outbound notification text instead of transmitting it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

impl MeshTransport for LogTransport {
    async fn send(&self, channel: Channel, text: &str) -> Result<(), TransportError> {
        info!(
            target: "meshfence::mesh",
            channel = %channel,
            channel_index = channel.index(),
            text,
            "Mesh notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_transport_always_succeeds() {
        tokio_test::assert_ok!(LogTransport.send(Channel::Private, "hello mesh").await);
    }
}
