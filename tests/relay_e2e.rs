//! End-to-end tests: relay and agents over loopback QUIC

mod common;

use common::*;
use relaymux::config::{RelayConfig, ServerAgentConfig, SocksConfig, TransportConfig};
use relaymux::directory::REPLACED;
use relaymux::protocol::{write_message, Registration};
use relaymux::relay::OUT_OF_SCOPE;
use relaymux::session::KEEPALIVE_FAILED;
use relaymux::ServerAgent;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::broadcast;
use tokio::time::Instant;

#[tokio::test]
async fn test_forwarding_reaches_endpoint_server_port() {
    let relay = start_relay(relay_config()).await;
    let (service, mut captured) = start_capture_server(7, b"HTTP/1.0 200 OK\r\n\r\n").await;

    let _server = start_server_agent(&relay, "dev1");
    assert!(wait_until(|| relay.state.servers.lookup(&"dev1".to_string()).is_some()).await);

    let (local, _, _client) = start_client_agent(client_config(&relay, "dev1", service.port())).await;

    let mut conn = TcpStream::connect(local).await.unwrap();
    conn.write_all(b"GET /\r\n").await.unwrap();

    let received = tokio::time::timeout(WAIT, captured.recv()).await.unwrap().unwrap();
    assert_eq!(received, b"GET /\r\n");

    let mut response = Vec::new();
    tokio::time::timeout(WAIT, conn.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response, b"HTTP/1.0 200 OK\r\n\r\n");
}

#[tokio::test]
async fn test_connections_share_one_session() {
    let relay = start_relay(relay_config()).await;
    let echo = start_echo_server().await;

    let _server = start_server_agent(&relay, "shared");
    assert!(wait_until(|| relay.state.servers.lookup(&"shared".to_string()).is_some()).await);

    let (local, _, _client) = start_client_agent(client_config(&relay, "shared", echo.port())).await;

    let mut tasks = Vec::new();
    for i in 0..4u8 {
        tasks.push(tokio::spawn(async move {
            let mut conn = TcpStream::connect(local).await.unwrap();
            let msg = [b'a' + i; 32];
            conn.write_all(&msg).await.unwrap();
            let mut buf = [0u8; 32];
            conn.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, msg);
        }));
    }
    for task in tasks {
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    }

    assert_eq!(relay.state.reverse_clients.len(), 1);
}

#[tokio::test]
async fn test_second_registration_replaces_first() {
    let relay = start_relay(relay_config()).await;
    let key = "dev2".to_string();

    let (first, _first_cmd) = register_raw(&relay, &Registration::server("dev2")).await;
    assert!(wait_until(|| relay.state.servers.lookup(&key).is_some()).await);
    let first_handle = relay.state.servers.lookup(&key).unwrap();

    let (second, _second_cmd) = register_raw(&relay, &Registration::server("dev2")).await;

    assert_eq!(close_reason(&first).await.as_deref(), Some(REPLACED));
    assert!(
        wait_until(|| {
            relay
                .state
                .servers
                .lookup(&key)
                .map(|h| !Arc::ptr_eq(&h, &first_handle))
                .unwrap_or(false)
        })
        .await
    );
    assert!(!second.is_closed());
    assert_eq!(relay.state.servers.len(), 1);
}

#[tokio::test]
async fn test_lookup_miss_closes_only_the_stream() {
    let relay = start_relay(relay_config()).await;

    let (client, _cmd) = register_raw(&relay, &Registration::reverse_client("ghost", 80)).await;
    assert!(wait_until(|| relay.state.reverse_clients.len() == 1).await);

    let (mut send, mut recv) = client.session().open_bi().await.unwrap();
    send.write_all(b"hello").await.unwrap();

    assert!(stream_ended(&mut send, &mut recv).await);

    assert!(!client.is_closed());
    assert_eq!(relay.state.reverse_clients.len(), 1);

    let (mut again, _) = client.session().open_bi().await.unwrap();
    again.write_all(b"still here").await.unwrap();
    assert!(!client.is_closed());
}

#[tokio::test]
async fn test_reverse_client_without_port_is_rejected() {
    let relay = start_relay(relay_config()).await;

    let registration = Registration {
        port: None,
        ..Registration::reverse_client("dev", 1)
    };
    let (client, _cmd) = register_raw(&relay, &registration).await;

    assert_eq!(close_reason(&client).await.as_deref(), Some(OUT_OF_SCOPE));
    assert!(relay.state.reverse_clients.is_empty());
}

#[tokio::test]
async fn test_server_agent_reconnects_after_session_loss() {
    let relay = start_relay(relay_config()).await;
    let key = "dev4".to_string();

    let _server = start_server_agent(&relay, "dev4");
    assert!(wait_until(|| relay.state.servers.lookup(&key).is_some()).await);
    let old = relay.state.servers.lookup(&key).unwrap();

    old.force_close("test");

    assert!(
        wait_until(|| {
            relay
                .state
                .servers
                .lookup(&key)
                .map(|h| !Arc::ptr_eq(&h, &old))
                .unwrap_or(false)
        })
        .await
    );
}

#[tokio::test]
async fn test_server_agent_retries_failed_registration_after_delay() {
    // A relay address that swallows every datagram
    let dead = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = dead.local_addr().unwrap();

    let config = ServerAgentConfig {
        reconnect_delay: 2,
        ..ServerAgentConfig::new(addr.to_string(), "late")
    };
    let transport = TransportConfig {
        idle_timeout: 1,
        ..TransportConfig::default()
    };
    let agent = ServerAgent::new(config, &transport).unwrap();
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move { agent.run(shutdown_rx).await });

    // Every attempt is a new connection with its own destination id in the
    // Initial long header. The next one only starts after the delay.
    let gap = tokio::time::timeout(WAIT, async {
        let mut buf = [0u8; 2048];
        let mut current: Option<(Vec<u8>, Instant)> = None;
        loop {
            let (n, _) = dead.recv_from(&mut buf).await.unwrap();
            let now = Instant::now();
            if n < 6 || buf[0] & 0x80 == 0 {
                continue;
            }
            let len = buf[5] as usize;
            let dcid = buf[6..(6 + len).min(n)].to_vec();
            if let Some((id, last)) = &current {
                if *id != dcid {
                    return now - *last;
                }
            }
            current = Some((dcid, now));
        }
    })
    .await
    .unwrap();
    assert!(gap >= Duration::from_millis(1800), "retried after {:?}", gap);
    drop(dead);

    let relay = start_relay(RelayConfig {
        listen_addr: addr.to_string(),
        ..relay_config()
    })
    .await;
    assert!(wait_until(|| relay.state.servers.lookup(&"late".to_string()).is_some()).await);
}

#[tokio::test]
async fn test_reverse_client_cap_rejects_extra_sessions() {
    let relay = start_relay(RelayConfig {
        max_reverse_clients: 1,
        ..relay_config()
    })
    .await;

    let (first, _first_cmd) = register_raw(&relay, &Registration::reverse_client("dev", 80)).await;
    assert!(wait_until(|| relay.state.reverse_clients.len() == 1).await);

    let (second, _second_cmd) = register_raw(&relay, &Registration::reverse_client("dev", 80)).await;

    assert_eq!(close_reason(&second).await.as_deref(), Some(OUT_OF_SCOPE));
    assert!(!first.is_closed());
    assert_eq!(relay.state.reverse_clients.len(), 1);
}

#[tokio::test]
async fn test_second_proxy_registration_replaces_first() {
    let relay = start_relay(RelayConfig {
        proxy_token: Some("tok".to_string()),
        ..relay_config()
    })
    .await;
    let key = "tok".to_string();

    let (first, _first_cmd) = register_raw(&relay, &Registration::proxy("tok")).await;
    assert!(wait_until(|| relay.state.proxies.lookup(&key).is_some()).await);
    let first_handle = relay.state.proxies.lookup(&key).unwrap();

    let (second, _second_cmd) = register_raw(&relay, &Registration::proxy("tok")).await;

    assert_eq!(close_reason(&first).await.as_deref(), Some(REPLACED));
    assert!(
        wait_until(|| {
            relay
                .state
                .proxies
                .lookup(&key)
                .map(|h| !Arc::ptr_eq(&h, &first_handle))
                .unwrap_or(false)
        })
        .await
    );
    assert!(!second.is_closed());
    assert_eq!(relay.state.proxies.len(), 1);
}

#[tokio::test]
async fn test_silent_session_fails_keepalive() {
    let relay = start_relay(RelayConfig {
        keepalive_interval: 1,
        ..relay_config()
    })
    .await;

    // nobody reads the command stream, so pings go unanswered
    let (server, _cmd) = register_raw(&relay, &Registration::server("mute")).await;

    assert_eq!(close_reason(&server).await.as_deref(), Some(KEEPALIVE_FAILED));
    assert!(wait_until(|| relay.state.servers.is_empty()).await);
}

#[tokio::test]
async fn test_answered_pings_keep_session_alive() {
    let relay = start_relay(RelayConfig {
        keepalive_interval: 1,
        ..relay_config()
    })
    .await;

    let (server, mut cmd) = register_raw(&relay, &Registration::server("chatty")).await;
    let serving = server.clone();
    tokio::spawn(async move { serving.serve_commands(&mut cmd).await });

    tokio::time::sleep(std::time::Duration::from_secs(7)).await;
    assert!(!server.is_closed());
    assert!(relay.state.servers.lookup(&"chatty".to_string()).is_some());
}

#[tokio::test]
async fn test_socks_connect_through_relay() {
    let relay = start_relay(RelayConfig {
        proxy_token: Some("tok".to_string()),
        allow_local_destinations: true,
        ..relay_config()
    })
    .await;
    let echo = start_echo_server().await;

    let mut config = client_config(&relay, "unused", 1);
    config.socks = Some(SocksConfig::new(0, "tok"));
    let (_, socks, _client) = start_client_agent(config).await;
    let socks = socks.unwrap();

    let mut conn = TcpStream::connect(socks).await.unwrap();
    conn.write_all(&[5, 1, 0]).await.unwrap();
    let mut choice = [0u8; 2];
    conn.read_exact(&mut choice).await.unwrap();
    assert_eq!(choice, [5, 0]);

    let mut request = vec![5, 1, 0, 1, 127, 0, 0, 1];
    request.extend_from_slice(&echo.port().to_be_bytes());
    conn.write_all(&request).await.unwrap();
    let mut reply = [0u8; 10];
    conn.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x00);

    conn.write_all(b"ping").await.unwrap();
    let mut echoed = [0u8; 4];
    tokio::time::timeout(WAIT, conn.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"ping");
    assert_eq!(relay.state.proxies.len(), 1);
}

#[tokio::test]
async fn test_socks_refuses_udp_associate() {
    let relay = start_relay(RelayConfig {
        proxy_token: Some("tok".to_string()),
        ..relay_config()
    })
    .await;

    let mut config = client_config(&relay, "unused", 1);
    config.socks = Some(SocksConfig::new(0, "tok"));
    let (_, socks, _client) = start_client_agent(config).await;

    let mut conn = TcpStream::connect(socks.unwrap()).await.unwrap();
    conn.write_all(&[5, 1, 0]).await.unwrap();
    let mut choice = [0u8; 2];
    conn.read_exact(&mut choice).await.unwrap();

    conn.write_all(&[5, 3, 0, 1, 0, 0, 0, 0, 0, 0]).await.unwrap();
    let mut reply = [0u8; 10];
    conn.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x07);
}

#[tokio::test]
async fn test_relay_refuses_local_destinations_by_default() {
    let relay = start_relay(RelayConfig {
        proxy_token: Some("tok".to_string()),
        ..relay_config()
    })
    .await;
    let echo = start_echo_server().await;

    let (proxy, _cmd) = register_raw(&relay, &Registration::proxy("tok")).await;
    let (mut send, mut recv) = proxy.session().open_bi().await.unwrap();
    write_message(
        &mut send,
        &relaymux::protocol::LinkHeader::remote("127.0.0.1", echo.port()),
    )
    .await
    .unwrap();

    // dropped without dialing
    assert!(stream_ended(&mut send, &mut recv).await);
    assert!(!proxy.is_closed());
}

#[tokio::test]
async fn test_proxy_token_mismatch_is_rejected() {
    let relay = start_relay(RelayConfig {
        proxy_token: Some("right".to_string()),
        ..relay_config()
    })
    .await;

    let (proxy, _cmd) = register_raw(&relay, &Registration::proxy("wrong")).await;

    assert_eq!(close_reason(&proxy).await.as_deref(), Some(OUT_OF_SCOPE));
    assert!(relay.state.proxies.is_empty());
}
