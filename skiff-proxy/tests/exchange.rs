use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;

use skiff_proxy::{FilterConfig, FilterRule, PatternType, Proxy, ProxyConfig};

async fn start_proxy(config: ProxyConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let proxy = Proxy::new(config).unwrap();
    tokio::spawn(async move {
        let _ = proxy.serve(listener).await;
    });
    address
}

/// Accepts one connection, reads until the header terminator, then answers
/// with the canned response and reports what it received.
async fn start_origin(response: &'static [u8]) -> (SocketAddr, oneshot::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let (sender, receiver) = oneshot::channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = stream.read(&mut chunk).await.unwrap();
            if read == 0 {
                break;
            }
            received.extend_from_slice(&chunk[..read]);
            if received.windows(4).any(|window| window == b"\r\n\r\n") {
                break;
            }
        }
        stream.write_all(response).await.unwrap();
        stream.shutdown().await.unwrap();
        let _ = sender.send(received);
    });
    (address, receiver)
}

async fn roundtrip(proxy: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(request).await.unwrap();
    let mut response = Vec::new();
    timeout(Duration::from_secs(10), client.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

#[tokio::test]
async fn forwards_a_get_exchange_end_to_end() {
    let (origin, received) =
        start_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
    let proxy = start_proxy(ProxyConfig::default()).await;

    let request = format!(
        "GET http://127.0.0.1:{port}/foo HTTP/1.1\r\nHost: 127.0.0.1\r\nAccept: */*\r\n\r\n",
        port = origin.port()
    );
    let response = String::from_utf8(roundtrip(proxy, request.as_bytes()).await).unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("\r\nVia: 1.1 "));
    assert!(response.contains("\r\nContent-Length: 5\r\n"));
    assert!(response.ends_with("\r\n\r\nhello"));

    let outbound = String::from_utf8(received.await.unwrap()).unwrap();
    assert!(outbound.starts_with("GET /foo HTTP/1.0\r\n"));
    assert!(outbound.contains(&format!("\r\nHost: 127.0.0.1:{}\r\n", origin.port())));
    assert!(outbound.contains("\r\nConnection: close\r\n"));
    assert!(outbound.contains("\r\nVia: 1.1 "));
    assert!(outbound.contains("\r\nAccept: */*\r\n"));
    // the client's own Host header is replaced, not forwarded
    assert!(!outbound.contains("\r\nHost: 127.0.0.1\r\n"));
}

#[tokio::test]
async fn forwards_a_declared_request_body() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = listener.local_addr().unwrap();
    let (sender, received) = oneshot::channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut collected = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = stream.read(&mut chunk).await.unwrap();
            if read == 0 {
                break;
            }
            collected.extend_from_slice(&chunk[..read]);
            if collected.ends_with(b"ping") {
                break;
            }
        }
        stream
            .write_all(b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();
        let _ = sender.send(collected);
    });

    let proxy = start_proxy(ProxyConfig::default()).await;
    let request = format!(
        "POST http://127.0.0.1:{port}/submit HTTP/1.1\r\nHost: 127.0.0.1\r\nContent-Length: 4\r\n\r\nping",
        port = origin.port()
    );
    let response = String::from_utf8(roundtrip(proxy, request.as_bytes()).await).unwrap();

    assert!(response.starts_with("HTTP/1.1 204 No Content\r\n"));
    let outbound = String::from_utf8(received.await.unwrap()).unwrap();
    assert!(outbound.contains("\r\nContent-Length: 4\r\n"));
    assert!(outbound.ends_with("\r\n\r\nping"));
}

#[tokio::test]
async fn tunnels_a_connect_exchange() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut probe = [0u8; 4];
        stream.read_exact(&mut probe).await.unwrap();
        assert_eq!(&probe, b"ping");
        stream.write_all(b"pong").await.unwrap();
        stream.flush().await.unwrap();
    });

    let proxy = start_proxy(ProxyConfig::default()).await;
    let mut client = TcpStream::connect(proxy).await.unwrap();
    let request = format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", origin.port());
    client.write_all(request.as_bytes()).await.unwrap();

    let mut greeting = Vec::new();
    let mut byte = [0u8; 1];
    while !greeting.ends_with(b"\r\n\r\n") {
        client.read_exact(&mut byte).await.unwrap();
        greeting.push(byte[0]);
    }
    let greeting = String::from_utf8(greeting).unwrap();
    assert!(greeting.starts_with("HTTP/1.0 200 Connection established\r\n"));
    assert!(greeting.contains("Proxy-agent: skiff/"));

    client.write_all(b"ping").await.unwrap();
    let mut reply = [0u8; 4];
    timeout(Duration::from_secs(10), client.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&reply, b"pong");
}

#[tokio::test]
async fn refuses_a_connect_to_a_disallowed_port() {
    let mut config = ProxyConfig::default();
    config.connect_ports = vec![443];
    let proxy = start_proxy(config).await;

    let response = String::from_utf8(
        roundtrip(proxy, b"CONNECT example.com:70 HTTP/1.1\r\n\r\n").await,
    )
    .unwrap();

    assert!(response.starts_with("HTTP/1.1 403 Access violation\r\n"));
    assert!(response.contains("not allowed"));
}

#[tokio::test]
async fn refuses_a_filtered_domain() {
    let mut config = ProxyConfig::default();
    config.filter = FilterConfig {
        enabled: true,
        match_urls: false,
        default_deny: false,
        rules: vec![FilterRule {
            pattern_type: PatternType::Wildcard,
            pattern: "blocked.example".to_string(),
        }],
    };
    let proxy = start_proxy(config).await;

    let response = String::from_utf8(
        roundtrip(
            proxy,
            b"GET http://blocked.example/ HTTP/1.1\r\nHost: blocked.example\r\n\r\n",
        )
        .await,
    )
    .unwrap();

    assert!(response.starts_with("HTTP/1.1 403 Filtered\r\n"));
    assert!(response.contains("has been filtered"));
}

#[tokio::test]
async fn answers_a_malformed_request_line_with_400() {
    let proxy = start_proxy(ProxyConfig::default()).await;
    let response =
        String::from_utf8(roundtrip(proxy, b"GET /x HTTP/1.1 garbage\r\n\r\n").await).unwrap();
    // the request line never parsed, so the error document speaks HTTP/1.0
    assert!(response.starts_with("HTTP/1.0 400 Bad Request\r\n"));
}

#[tokio::test]
async fn serves_the_stats_document() {
    let mut config = ProxyConfig::default();
    config.stat_host = Some("skiff.stats".to_string());
    let proxy = start_proxy(config).await;

    let response = String::from_utf8(
        roundtrip(
            proxy,
            b"GET http://skiff.stats/ HTTP/1.1\r\nHost: skiff.stats\r\n\r\n",
        )
        .await,
    )
    .unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Type: application/json"));
    assert!(response.contains("\"connreqs\""));
}

#[tokio::test]
async fn short_destination_body_is_flushed_not_retried() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut chunk = [0u8; 4096];
        let mut received = Vec::new();
        loop {
            let read = stream.read(&mut chunk).await.unwrap();
            if read == 0 {
                break;
            }
            received.extend_from_slice(&chunk[..read]);
            if received.windows(4).any(|window| window == b"\r\n\r\n") {
                break;
            }
        }
        // declare 100 bytes, deliver 7, then close
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();
    });

    let proxy = start_proxy(ProxyConfig::default()).await;
    let request = format!(
        "GET http://127.0.0.1:{port}/ HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
        port = origin.port()
    );

    let started = std::time::Instant::now();
    let response = String::from_utf8(roundtrip(proxy, request.as_bytes()).await).unwrap();
    assert!(response.ends_with("partial"));
    assert!(started.elapsed() < Duration::from_secs(30));
}
