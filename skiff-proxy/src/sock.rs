use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream, lookup_host};
use tokio::time::timeout;

use crate::error::ProxyError;

/// Opens the outbound connection, trying each resolved address in turn, with
/// an optional local bind address for multi-homed hosts.
pub async fn connect(
    host: &str,
    port: u16,
    bind_address: Option<&str>,
    deadline: Duration,
) -> Result<TcpStream, ProxyError> {
    let bind_ip = match bind_address {
        Some(text) => Some(text.parse::<IpAddr>().map_err(|_| {
            ProxyError::Config(format!("unusable bind address: {text}"))
        })?),
        None => None,
    };

    let addresses = lookup_host((host, port))
        .await
        .map_err(|err| ProxyError::Route(format!("could not resolve {host}: {err}")))?;

    let mut last_error = None;
    for address in addresses {
        let socket = match address {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(ProxyError::Io)?;

        if let Some(ip) = bind_ip {
            if ip.is_ipv4() != address.is_ipv4() {
                continue;
            }
            if let Err(err) = socket.bind(SocketAddr::new(ip, 0)) {
                last_error = Some(ProxyError::Io(err));
                continue;
            }
        }

        match timeout(deadline, socket.connect(address)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(err)) => last_error = Some(ProxyError::Io(err)),
            Err(_) => last_error = Some(ProxyError::Timeout(deadline)),
        }
    }

    Err(last_error
        .unwrap_or_else(|| ProxyError::Route(format!("no usable address for {host}"))))
}

pub async fn listen(host: &str, port: u16) -> Result<TcpListener, ProxyError> {
    TcpListener::bind((host, port))
        .await
        .map_err(|err| ProxyError::Config(format!("could not listen on {host}:{port}: {err}")))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use tokio::net::TcpListener;

    use super::{connect, listen};
    use crate::error::ProxyError;

    #[tokio::test]
    async fn connects_to_a_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = connect("127.0.0.1", port, None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn honors_the_bind_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = connect("127.0.0.1", port, Some("127.0.0.1"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            stream.local_addr().unwrap().ip(),
            "127.0.0.1".parse::<std::net::IpAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn rejects_a_malformed_bind_address() {
        let err = connect("127.0.0.1", 80, Some("not-an-ip"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_matches!(err, ProxyError::Config(_));
    }

    #[tokio::test]
    async fn listens_on_an_ephemeral_port() {
        let listener = listen("127.0.0.1", 0).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
