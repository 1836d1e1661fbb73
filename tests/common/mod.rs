//! Test utilities for Relaymux
//!
//! Runs the relay and agents on loopback and provides small TCP services
//! for them to reach.

#![allow(dead_code)]

use quinn::{ConnectionError, RecvStream, SendStream};
use relaymux::agent::register;
use relaymux::config::{ClientAgentConfig, RelayConfig, ServerAgentConfig, TransportConfig};
use relaymux::protocol::Registration;
use relaymux::relay::{Relay, RelayState};
use relaymux::session::EndpointPeer;
use relaymux::transport::{AddrMaybeCached, Dialer};
use relaymux::{ClientAgent, ServerAgent};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

/// How long a test waits for something to happen
pub const WAIT: Duration = Duration::from_secs(10);

/// A relay running in the background
pub struct TestRelay {
    pub addr: SocketAddr,
    pub state: Arc<RelayState>,
    pub shutdown_tx: broadcast::Sender<bool>,
}

impl TestRelay {
    /// Relay address as agents expect it
    pub fn addr_string(&self) -> String {
        self.addr.to_string()
    }
}

/// Relay settings for tests: loopback, ephemeral port
pub fn relay_config() -> RelayConfig {
    RelayConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        ..RelayConfig::default()
    }
}

/// Start a relay with `config`
pub async fn start_relay(config: RelayConfig) -> TestRelay {
    let relay = Relay::bind(config, &TransportConfig::default())
        .await
        .unwrap();
    let addr = relay.local_addr().unwrap();
    let state = relay.state();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(relay.run(shutdown_rx));

    TestRelay {
        addr,
        state,
        shutdown_tx,
    }
}

/// Start an endpoint server agent registering as `device_id`
pub fn start_server_agent(relay: &TestRelay, device_id: &str) -> broadcast::Sender<bool> {
    let config = ServerAgentConfig::new(relay.addr_string(), device_id);
    let agent = ServerAgent::new(config, &TransportConfig::default()).unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move { agent.run(shutdown_rx).await });
    shutdown_tx
}

/// Bind and start an endpoint client agent
pub async fn start_client_agent(
    config: ClientAgentConfig,
) -> (SocketAddr, Option<SocketAddr>, broadcast::Sender<bool>) {
    let agent = ClientAgent::bind(config, &TransportConfig::default())
        .await
        .unwrap();
    let local = agent.local_addr().unwrap();
    let socks = agent.socks_addr();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(agent.run(shutdown_rx));
    (local, socks, shutdown_tx)
}

/// Client agent settings on an ephemeral local port
pub fn client_config(relay: &TestRelay, device_id: &str, target_port: u16) -> ClientAgentConfig {
    ClientAgentConfig {
        local_port: 0,
        target_port,
        ..ClientAgentConfig::new(relay.addr_string(), device_id)
    }
}

/// Register directly with the relay, bypassing the agents
pub async fn register_raw(
    relay: &TestRelay,
    registration: &Registration,
) -> (Arc<EndpointPeer>, RecvStream) {
    let dialer = Dialer::new(&TransportConfig::default());
    register(&dialer, &AddrMaybeCached::from(relay.addr), registration)
        .await
        .unwrap()
}

/// TCP echo server on loopback
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// TCP server that reads `expect` bytes per connection, reports them and
/// answers with `response` before closing
pub async fn start_capture_server(
    expect: usize,
    response: &'static [u8],
) -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; expect];
                if stream.read_exact(&mut buf).await.is_ok() {
                    let _ = tx.send(buf);
                    let _ = stream.write_all(response).await;
                    let _ = stream.shutdown().await;
                }
            });
        }
    });
    (addr, rx)
}

/// Poll `condition` until it holds or [`WAIT`] passes
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Wait for `peer`'s session to close and return the application close reason
pub async fn close_reason(peer: &EndpointPeer) -> Option<String> {
    let err = tokio::time::timeout(WAIT, peer.session().closed())
        .await
        .ok()?;
    match err {
        ConnectionError::ApplicationClosed(close) => {
            Some(String::from_utf8_lossy(&close.reason).into_owned())
        }
        _ => None,
    }
}

/// Wait until the relay has given up on a stream from either direction
pub async fn stream_ended(send: &mut SendStream, recv: &mut RecvStream) -> bool {
    let ended = async {
        tokio::select! {
            _ = recv.read_to_end(1024) => {}
            _ = send.stopped() => {}
        }
    };
    tokio::time::timeout(WAIT, ended).await.is_ok()
}
