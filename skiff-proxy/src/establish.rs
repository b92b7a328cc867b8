use skiff_net::{format_host, format_host_port};

use crate::conn::{Connection, Request};
use crate::error::ProxyError;
use crate::errorpage::proxy_agent;

/// The outbound request line and framing headers. The destination side is
/// always spoken as HTTP/1.0 with `Connection: close`; the destination
/// connection never outlives one exchange.
pub fn outbound_request_block(request: &Request) -> Vec<u8> {
    format!(
        "{method} {path} HTTP/1.0\r\nHost: {host}\r\nConnection: close\r\n",
        method = request.method,
        path = request.path,
        host = format_host_port(&request.host, request.port),
    )
    .into_bytes()
}

pub async fn emit_outbound_request(
    conn: &mut Connection,
    request: &Request,
) -> Result<(), ProxyError> {
    let block = outbound_request_block(request);
    match conn.server.as_mut() {
        Some(server) => server.write_all(&block).await,
        None => Err(ProxyError::Write("no destination connection".to_string())),
    }
}

/// Rewrites the path to the absolute form an upstream proxy expects, so the
/// one outbound-request emitter serves both routes.
pub fn upstream_path(request: &Request, tunnel: bool) -> String {
    if tunnel {
        format!("{}:{}", format_host(&request.host), request.port)
    } else {
        format!(
            "http://{}:{}{}",
            format_host(&request.host),
            request.port,
            request.path
        )
    }
}

pub async fn emit_tunnel_established(conn: &mut Connection) -> Result<(), ProxyError> {
    let response = format!(
        "HTTP/1.0 200 Connection established\r\nProxy-agent: {}\r\n\r\n",
        proxy_agent()
    );
    conn.client.write_all(response.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::{outbound_request_block, upstream_path};
    use crate::conn::Request;

    fn request(method: &str, host: &str, port: u16, path: &str) -> Request {
        Request {
            method: method.to_string(),
            host: host.to_string(),
            port,
            path: path.to_string(),
        }
    }

    #[test]
    fn outbound_request_is_http_1_0_close() {
        let block = outbound_request_block(&request("GET", "example.com", 80, "/foo"));
        assert_eq!(
            block,
            b"GET /foo HTTP/1.0\r\nHost: example.com\r\nConnection: close\r\n"
        );
    }

    #[test]
    fn outbound_host_carries_nonstandard_port() {
        let block = outbound_request_block(&request("GET", "example.com", 8001, "/"));
        let text = String::from_utf8(block).unwrap();
        assert!(text.contains("Host: example.com:8001\r\n"));
    }

    #[test]
    fn outbound_host_brackets_ipv6_literals() {
        let block = outbound_request_block(&request("GET", "::1", 8080, "/"));
        let text = String::from_utf8(block).unwrap();
        assert!(text.contains("Host: [::1]:8080\r\n"));
    }

    #[test]
    fn upstream_path_is_absolute_for_plain_requests() {
        let path = upstream_path(&request("GET", "example.com", 80, "/foo"), false);
        assert_eq!(path, "http://example.com:80/foo");
    }

    #[test]
    fn upstream_path_is_authority_for_tunnels() {
        let path = upstream_path(&request("CONNECT", "example.com", 443, ""), true);
        assert_eq!(path, "example.com:443");
    }
}
