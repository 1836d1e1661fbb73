//! QUIC sessions between agents and the relay
//!
//! The relay serves a self-signed certificate generated at startup.
//! Agents do not verify it: the device identifier and proxy token are the
//! only access control.

use super::AddrMaybeCached;
use crate::config::TransportConfig;
use anyhow::{anyhow, Context, Result};
use quinn::{ClientConfig, Connection, Endpoint, IdleTimeout, ServerConfig, VarInt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Server name presented to the relay's certificate
pub const SERVER_NAME: &str = "localhost";

/// Application protocol negotiated on every session
pub const ALPN: &[u8] = b"quic-echo-example";

fn transport_config(config: &TransportConfig) -> quinn::TransportConfig {
    let idle_ms = (config.idle_timeout.saturating_mul(1000)).min(u32::MAX as u64) as u32;

    let mut transport = quinn::TransportConfig::default();
    transport.max_concurrent_uni_streams(0_u8.into());
    transport.max_concurrent_bidi_streams(VarInt::from_u32(config.max_concurrent_streams));
    transport.max_idle_timeout(Some(IdleTimeout::from(VarInt::from_u32(idle_ms))));
    transport
}

/// Build the relay's server configuration around a fresh self-signed certificate
pub fn configure_server(config: &TransportConfig) -> Result<ServerConfig> {
    let cert = rcgen::generate_simple_self_signed(vec![SERVER_NAME.to_string()])
        .context("Failed to generate certificate")?;
    let cert_der = cert
        .serialize_der()
        .context("Failed to serialize certificate")?;
    let priv_key = rustls::PrivateKey(cert.serialize_private_key_der());
    let cert_chain = vec![rustls::Certificate(cert_der)];

    let mut crypto = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(cert_chain, priv_key)
        .context("Failed to build server TLS configuration")?;
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let mut server_config = ServerConfig::with_crypto(Arc::new(crypto));
    server_config.transport_config(Arc::new(transport_config(config)));
    Ok(server_config)
}

/// Build the agents' client configuration
pub fn configure_client(config: &TransportConfig) -> ClientConfig {
    let mut crypto = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(SkipServerVerification::new())
        .with_no_client_auth();
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let mut client_config = ClientConfig::new(Arc::new(crypto));
    client_config.transport_config(Arc::new(transport_config(config)));
    client_config
}

/// Bind the relay's QUIC endpoint
pub fn server_endpoint(listen: SocketAddr, config: &TransportConfig) -> Result<Endpoint> {
    let server_config = configure_server(config)?;
    Endpoint::server(server_config, listen)
        .with_context(|| format!("Failed to bind QUIC endpoint on {}", listen))
}

/// Opens QUIC sessions to the relay
///
/// One client endpoint per address family is created on first use and
/// shared by every session dialed afterwards.
pub struct Dialer {
    client_config: ClientConfig,
    v4: Mutex<Option<Endpoint>>,
    v6: Mutex<Option<Endpoint>>,
}

impl Dialer {
    /// Create a dialer from transport settings
    pub fn new(config: &TransportConfig) -> Self {
        Dialer {
            client_config: configure_client(config),
            v4: Mutex::new(None),
            v6: Mutex::new(None),
        }
    }

    fn endpoint_for(&self, remote: &SocketAddr) -> Result<Endpoint> {
        let (slot, bind): (&Mutex<Option<Endpoint>>, SocketAddr) = if remote.is_ipv6() {
            (&self.v6, SocketAddr::from(([0u16; 8], 0)))
        } else {
            (&self.v4, SocketAddr::from(([0u8; 4], 0)))
        };

        let mut slot = slot.lock().map_err(|_| anyhow!("Dialer state poisoned"))?;
        if let Some(endpoint) = slot.as_ref() {
            return Ok(endpoint.clone());
        }
        let endpoint = Endpoint::client(bind)
            .with_context(|| format!("Failed to bind QUIC client endpoint on {}", bind))?;
        *slot = Some(endpoint.clone());
        Ok(endpoint)
    }

    /// Establish a session with the relay at `addr`
    pub async fn dial(&self, addr: &AddrMaybeCached) -> Result<Connection> {
        let remote = addr.resolve().await?;
        let endpoint = self.endpoint_for(&remote)?;

        let connecting = endpoint
            .connect_with(self.client_config.clone(), remote, SERVER_NAME)
            .with_context(|| format!("Failed to start connecting to {}", addr.addr()))?;

        match connecting.await {
            Ok(connection) => {
                debug!("QUIC session established to {}", remote);
                Ok(connection)
            }
            Err(e) => {
                addr.clear_cache().await;
                Err(e).with_context(|| format!("Failed to connect to {}", addr.addr()))
            }
        }
    }
}

struct SkipServerVerification;

impl SkipServerVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}
