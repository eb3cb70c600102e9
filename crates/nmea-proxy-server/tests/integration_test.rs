//! Integration tests for the NMEA proxy.
//!
//! These tests start a real proxy on an ephemeral port and connect plain
//! TCP clients to verify fanout and connection lifecycle end to end.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use nmea_proxy_server::{ControlRequest, NmeaProxy, ProxyConfig, ProxyError};

const POLL: Duration = Duration::from_millis(10);

/// Start a proxy with a single listener on an ephemeral port.
async fn start_test_proxy() -> (NmeaProxy, SocketAddr) {
    let config = ProxyConfig {
        tcp_ports: vec![0],
        ..Default::default()
    };
    let proxy = NmeaProxy::start(config).await.expect("proxy should start");
    let port = proxy.listener_addrs()[0].port();
    (proxy, SocketAddr::from(([127, 0, 0, 1], port)))
}

/// Poll until the registry holds `count` links.
async fn wait_for_links(proxy: &NmeaProxy, count: usize) {
    timeout(Duration::from_secs(5), async {
        while proxy.registry().len() != count {
            sleep(POLL).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {} links, registry has {}",
            count,
            proxy.registry().len()
        )
    });
}

/// Connect a client and wait until the proxy has registered it.
async fn connect_client(proxy: &NmeaProxy, addr: SocketAddr) -> TcpStream {
    let expected = proxy.registry().len() + 1;
    let stream = TcpStream::connect(addr).await.expect("Failed to connect");
    wait_for_links(proxy, expected).await;
    stream
}

/// Read until `expected` bytes have arrived.
async fn recv_exact(stream: &mut TcpStream, expected: usize) -> Result<String, &'static str> {
    let mut buf = vec![0u8; expected];
    match timeout(Duration::from_secs(5), stream.read_exact(&mut buf)).await {
        Ok(Ok(_)) => Ok(String::from_utf8_lossy(&buf).into_owned()),
        Ok(Err(_)) => Err("Read error"),
        Err(_) => Err("Timeout"),
    }
}

/// Assert nothing arrives within a few poll intervals.
async fn assert_silent(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let result = timeout(POLL * 10, stream.read(&mut buf)).await;
    assert!(result.is_err(), "unexpected data: {:?}", result);
}

#[tokio::test]
async fn test_sentence_fans_out_to_other_clients() {
    let (proxy, addr) = start_test_proxy().await;

    let mut gps = connect_client(&proxy, addr).await;
    let mut plotter = connect_client(&proxy, addr).await;
    let mut logger = connect_client(&proxy, addr).await;

    gps.write_all(b"$GPRMC,1,2,3*6A\r").await.unwrap();

    assert_eq!(recv_exact(&mut plotter, 17).await.unwrap(), "$GPRMC,1,2,3*6A\r\n");
    assert_eq!(recv_exact(&mut logger, 17).await.unwrap(), "$GPRMC,1,2,3*6A\r\n");
    assert_silent(&mut gps).await;

    proxy.scheduler().shutdown(proxy.registry()).await;
}

#[tokio::test]
async fn test_split_writes_are_reassembled() {
    let (proxy, addr) = start_test_proxy().await;

    let mut sender = connect_client(&proxy, addr).await;
    let mut receiver = connect_client(&proxy, addr).await;

    sender.write_all(b"$GPRMC,1,2").await.unwrap();
    sleep(POLL * 3).await;
    sender.write_all(b",3*6A\r$GPGGA,4,").await.unwrap();
    sleep(POLL * 3).await;
    sender.write_all(b"5,6*47\r$PARTIAL").await.unwrap();

    let expected = "$GPRMC,1,2,3*6A\r\n$GPGGA,4,5,6*47\r\n";
    assert_eq!(recv_exact(&mut receiver, expected.len()).await.unwrap(), expected);
    assert_silent(&mut receiver).await;

    proxy.scheduler().shutdown(proxy.registry()).await;
}

#[tokio::test]
async fn test_disconnected_client_leaves_registry() {
    let (proxy, addr) = start_test_proxy().await;

    let mut a = connect_client(&proxy, addr).await;
    let mut b = connect_client(&proxy, addr).await;
    let c = connect_client(&proxy, addr).await;

    drop(c);
    wait_for_links(&proxy, 2).await;

    a.write_all(b"$IIMWV,045,R\r").await.unwrap();
    assert_eq!(recv_exact(&mut b, 14).await.unwrap(), "$IIMWV,045,R\r\n");

    let stats = proxy.registry().stats();
    assert_eq!(stats.len(), 2);
    assert!(stats.iter().all(|s| s.rx + s.tx == 1));

    proxy.scheduler().shutdown(proxy.registry()).await;
}

#[tokio::test]
async fn test_reconnect_gets_fresh_link_and_counters() {
    let (proxy, addr) = start_test_proxy().await;

    let mut listener = connect_client(&proxy, addr).await;
    let mut talker = connect_client(&proxy, addr).await;

    talker.write_all(b"$A\r$B\r").await.unwrap();
    assert_eq!(recv_exact(&mut listener, 8).await.unwrap(), "$A\r\n$B\r\n");

    let first = proxy.registry().stats()[1].clone();
    assert_eq!(first.rx, 2);

    drop(talker);
    wait_for_links(&proxy, 1).await;
    let _talker = connect_client(&proxy, addr).await;

    let stats = proxy.registry().stats();
    let second = &stats[1];
    assert_ne!(second.id, first.id);
    assert_eq!((second.rx, second.tx), (0, 0));

    proxy.scheduler().shutdown(proxy.registry()).await;
}

#[tokio::test]
async fn test_controller_shutdown_closes_clients() {
    let (proxy, addr) = start_test_proxy().await;

    let mut a = connect_client(&proxy, addr).await;
    let mut b = connect_client(&proxy, addr).await;

    let (controller, tx) = proxy.controller();
    let task = tokio::spawn(controller.run());

    tx.send(ControlRequest::Stats).await.unwrap();
    tx.send(ControlRequest::Shutdown).await.unwrap();

    let report = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    assert_eq!(report.aborted, 0);
    assert!(proxy.registry().is_empty());

    // Both clients observe EOF once their links are closed
    for client in [&mut a, &mut b] {
        let mut buf = [0u8; 8];
        let n = timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    // The listener is gone too
    sleep(POLL * 2).await;
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_missing_serial_device_is_skipped() {
    let config = ProxyConfig {
        serial: vec!["/dev/nmea-proxy-missing,4800".parse().unwrap()],
        tcp_ports: vec![0],
        ..Default::default()
    };
    let proxy = NmeaProxy::start(config).await.expect("listener still starts");
    assert!(proxy.registry().is_empty());
    assert_eq!(proxy.listener_addrs().len(), 1);

    proxy.scheduler().shutdown(proxy.registry()).await;
}

#[tokio::test]
async fn test_nothing_to_run() {
    let config = ProxyConfig {
        serial: vec!["/dev/nmea-proxy-missing".parse().unwrap()],
        ..Default::default()
    };
    let result = NmeaProxy::start(config).await;
    assert!(matches!(result, Err(ProxyError::NothingToRun)));
}
