use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use skiff_net::{HeaderStore, ProtocolVersion};

use crate::config::ProxyConfig;
use crate::conn::Connection;
use crate::error::ProxyError;
use crate::errorpage::proxy_agent;
use crate::io::LineIo;
use crate::reverse;

const CLIENT_SKIP_HEADERS: [&str; 6] = [
    "host",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailers",
    "upgrade",
];

const SERVER_SKIP_HEADERS: [&str; 4] = [
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
];

/// Reads header lines until the bare terminator line. Continuation lines
/// (leading space or tab) are concatenated verbatim onto the previous line
/// before the name/value split. An embedded status line arms the duplicate
/// guard: some non-conforming origins relay a second header block, and the
/// repeated names must not be forwarded twice.
pub async fn read_headers<S>(io: &mut LineIo<S>) -> Result<HeaderStore, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut store = HeaderStore::new();
    let mut logical: Option<String> = None;
    let mut drop_duplicates = false;

    loop {
        let line = io.read_line().await?;
        let continuation = line.starts_with(' ') || line.starts_with('\t');

        if !continuation {
            if let Some(complete) = logical.take() {
                commit_header(&mut store, &complete, drop_duplicates)?;
            }
        }

        if line.is_empty() {
            return Ok(store);
        }

        if is_status_line(&line) {
            drop_duplicates = true;
            continue;
        }

        match logical.as_mut() {
            Some(header) if continuation => header.push_str(&line),
            _ => logical = Some(line),
        }
    }
}

fn is_status_line(line: &str) -> bool {
    line.len() >= 5 && line[..5].eq_ignore_ascii_case("HTTP/")
}

fn commit_header(
    store: &mut HeaderStore,
    line: &str,
    drop_duplicates: bool,
) -> Result<(), ProxyError> {
    if drop_duplicates {
        if let Some(name) = line.split(':').next() {
            if store.contains(name.trim_end()) {
                return Ok(());
            }
        }
    }
    store
        .insert_raw_line(line)
        .map_err(|_| ProxyError::Read("header line without a separator".to_string()))
}

fn via_identity(config: &ProxyConfig) -> String {
    let name = config.via.proxy_name.as_deref().unwrap_or("unknown");
    format!("{name} ({})", proxy_agent())
}

/// Produces the outbound `Via` line, appending to an existing value when one
/// is present. Disabled Via emission leaves any existing header untouched so
/// it flows through like every other end-to-end header.
fn via_header_line(
    headers: &mut HeaderStore,
    version: ProtocolVersion,
    config: &ProxyConfig,
) -> Option<String> {
    if config.via.disabled {
        return None;
    }

    let identity = via_identity(config);
    let line = match headers.get("via") {
        Some(existing) => {
            let line = format!(
                "Via: {existing}, {}.{} {identity}",
                version.major, version.minor
            );
            headers.remove_all("via");
            line
        }
        None => format!("Via: {}.{} {identity}", version.major, version.minor),
    };
    Some(line)
}

pub async fn process_client_headers(
    conn: &mut Connection,
    headers: &mut HeaderStore,
    config: &ProxyConfig,
) -> Result<(), ProxyError> {
    if conn.server.is_none() || conn.show_stats || (conn.tunnel && conn.upstream.is_none()) {
        debug!(id = %conn.id, "not forwarding client headers to the destination");
        return Ok(());
    }

    conn.client_length = headers.content_length();
    headers.strip_hop_headers();
    for name in CLIENT_SKIP_HEADERS {
        headers.remove_all(name);
    }

    let mut block = Vec::new();
    if let Some(via) = via_header_line(headers, conn.version, config) {
        block.extend_from_slice(via.as_bytes());
        block.extend_from_slice(b"\r\n");
    }
    let anonymous = !config.anonymous_headers.is_empty();
    for header in headers.iter() {
        if anonymous
            && !config
                .anonymous_headers
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(&header.name))
        {
            continue;
        }
        block.extend_from_slice(header.name.as_bytes());
        block.extend_from_slice(b": ");
        block.extend_from_slice(header.value.as_bytes());
        block.extend_from_slice(b"\r\n");
    }
    block.extend_from_slice(b"\r\n");

    if let Some(server) = conn.server.as_mut() {
        if let Err(err) = server.write_all(&block).await {
            debug!(id = %conn.id, %err, "failed to forward client headers");
            conn.set_error(
                503,
                "Could not send data to remote server",
                &[(
                    "detail",
                    "A network error occurred while trying to write data to the remote web server.",
                )],
            );
        }
    }

    if let Some(length) = conn.client_length {
        if length > 0 {
            pull_client_body(conn, length).await?;
        }
    }

    Ok(())
}

/// Moves the declared request body off the client socket: forwarded to the
/// destination on the healthy path, read and discarded once the exchange has
/// failed, so the error document is not mistaken for mid-body bytes.
pub async fn pull_client_body(conn: &mut Connection, length: u64) -> Result<(), ProxyError> {
    let mut remaining = length;
    while remaining > 0 {
        let max = usize::try_from(remaining).unwrap_or(usize::MAX);
        let chunk = conn.client.read_body_chunk(max).await?;
        if chunk.is_empty() {
            return Err(ProxyError::Read(
                "client closed before sending the declared body".to_string(),
            ));
        }
        if conn.error.is_none() {
            if let Some(server) = conn.server.as_mut() {
                server.write_all(&chunk).await?;
            }
        }
        remaining -= chunk.len() as u64;
    }

    conn.client.consume_trailing_crlf();
    Ok(())
}

pub async fn process_server_headers(
    conn: &mut Connection,
    config: &ProxyConfig,
) -> Result<(), ProxyError> {
    let Some(server) = conn.server.as_mut() else {
        return Err(ProxyError::Write("no destination connection".to_string()));
    };

    let read_result = async {
        let status_line = loop {
            let line = server.read_line().await?;
            if !line.is_empty() {
                break line;
            }
        };
        let headers = read_headers(server).await?;
        Ok::<_, ProxyError>((status_line, headers))
    }
    .await;

    let (status_line, mut headers) = match read_result {
        Ok(parts) => parts,
        Err(err) => {
            conn.set_error(
                503,
                "Could not retrieve all the headers",
                &[(
                    "detail",
                    "The proxy was unable to retrieve and process headers from the remote web server.",
                )],
            );
            return Err(err);
        }
    };

    // A legacy client never sees the status line or headers, only the body.
    if conn.version.is_legacy() {
        return Ok(());
    }

    conn.server_length = headers.content_length();
    headers.strip_hop_headers();
    for name in SERVER_SKIP_HEADERS {
        headers.remove_all(name);
    }

    let mut block = Vec::new();
    block.extend_from_slice(status_line.as_bytes());
    block.extend_from_slice(b"\r\n");
    if let Some(via) = via_header_line(&mut headers, conn.version, config) {
        block.extend_from_slice(via.as_bytes());
        block.extend_from_slice(b"\r\n");
    }
    if let Some(location) = headers.get("location") {
        if let Some(rewritten) = reverse::rewrite_location(&config.reverse, location) {
            info!(id = %conn.id, from = location, to = %rewritten, "rewrote redirect");
            block.extend_from_slice(format!("Location: {rewritten}\r\n").as_bytes());
            headers.remove_all("location");
        }
    }
    for header in headers.iter() {
        block.extend_from_slice(header.name.as_bytes());
        block.extend_from_slice(b": ");
        block.extend_from_slice(header.value.as_bytes());
        block.extend_from_slice(b"\r\n");
    }
    block.extend_from_slice(b"\r\n");

    conn.client.write_all(&block).await
}
