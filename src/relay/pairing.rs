//! Stream pairing
//!
//! Joins a link stream accepted from a reverse client with a fresh stream
//! opened on the endpoint server registered under the client's device id.

use crate::directory::Directory;
use crate::error::RelayError;
use crate::helper::{bridge, BridgeStats};
use crate::protocol::{write_message, LinkHeader};
use crate::session::EndpointPeer;
use quinn::{RecvStream, SendStream};
use tracing::{debug, info};

/// Pair `initiator` with a new stream on the server registered as `device_id`
///
/// A lookup miss closes the initiator stream and nothing else. Otherwise a
/// stream is opened on the server's session, the link header naming `port`
/// is written and the two streams are bridged until either side stops.
pub async fn pair_with_server(
    servers: &Directory<String, EndpointPeer>,
    device_id: &str,
    port: u16,
    initiator: (SendStream, RecvStream),
) -> Result<BridgeStats, RelayError> {
    let (initiator_send, initiator_recv) = initiator;

    let server = match servers.lookup(&device_id.to_string()) {
        Some(server) => server,
        None => {
            info!(duid = device_id, "No endpoint server registered, closing link stream");
            drop(initiator_send);
            drop(initiator_recv);
            return Err(RelayError::Directory(format!(
                "no endpoint server registered for {}",
                device_id
            )));
        }
    };

    let (mut target_send, target_recv) = server
        .session()
        .open_bi()
        .await
        .map_err(|e| RelayError::Transport(format!("failed to open link stream: {}", e)))?;

    write_message(&mut target_send, &LinkHeader::local(port)).await?;
    debug!(duid = device_id, port, "Link stream paired");

    let stats = bridge((initiator_recv, initiator_send), (target_recv, target_send)).await;
    debug!(duid = device_id, port, ?stats, "Link stream closed");
    Ok(stats)
}
