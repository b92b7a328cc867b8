use std::io;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};
use tracing::debug;

use crate::buffer::RelayBuffer;

/// Relays bytes in both directions until the destination closes or errors,
/// the declared destination body length is exhausted, a write fails, or the
/// idle timeout passes with no readiness on either socket. A client that
/// stops sending only closes its own direction; the destination side keeps
/// draining.
pub async fn relay_connection(
    mut client: TcpStream,
    client_leftover: Vec<u8>,
    mut server: TcpStream,
    server_leftover: Vec<u8>,
    server_remaining: Option<u64>,
    idle_timeout: Duration,
    capacity: usize,
) {
    let mut cbuf = RelayBuffer::with_capacity(capacity);
    let mut sbuf = RelayBuffer::with_capacity(capacity);
    cbuf.seed(client_leftover);

    let mut remaining = server_remaining;
    let mut seed = server_leftover;
    if let Some(bytes) = remaining.as_mut() {
        let allowed = usize::try_from(*bytes).unwrap_or(usize::MAX);
        seed.truncate(allowed);
        *bytes -= seed.len() as u64;
    }
    sbuf.seed(seed);

    let mut client_open = true;
    let mut last_activity = Instant::now();

    loop {
        if remaining == Some(0) {
            break;
        }
        let idle_left = idle_timeout.saturating_sub(last_activity.elapsed());

        tokio::select! {
            ready = server.readable(), if sbuf.has_space() && remaining != Some(0) => {
                if ready.is_err() {
                    break;
                }
                let limit = remaining
                    .map_or(usize::MAX, |bytes| usize::try_from(bytes).unwrap_or(usize::MAX));
                match sbuf.fill_from(&server, limit) {
                    Ok(0) => break,
                    Ok(read) => {
                        if let Some(bytes) = remaining.as_mut() {
                            *bytes -= read as u64;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                    Err(_) => break,
                }
                last_activity = Instant::now();
            }
            ready = client.readable(), if client_open && cbuf.has_space() => {
                if ready.is_err() {
                    client_open = false;
                    continue;
                }
                match cbuf.fill_from(&client, usize::MAX) {
                    Ok(0) => client_open = false,
                    Ok(_) => {}
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                    Err(_) => client_open = false,
                }
                last_activity = Instant::now();
            }
            ready = client.writable(), if !sbuf.is_empty() => {
                if ready.is_err() {
                    break;
                }
                match sbuf.drain_to(&client) {
                    Ok(_) => {}
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                    Err(_) => break,
                }
                last_activity = Instant::now();
            }
            ready = server.writable(), if !cbuf.is_empty() => {
                if ready.is_err() {
                    break;
                }
                match cbuf.drain_to(&server) {
                    Ok(_) => {}
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                    Err(_) => break,
                }
                last_activity = Instant::now();
            }
            _ = sleep(idle_left) => {
                if last_activity.elapsed() >= idle_timeout {
                    debug!("relay idle timeout");
                    break;
                }
            }
        }
    }

    // Flush whatever is still buffered so nothing is silently dropped, then
    // half-close the client write side.
    if !sbuf.is_empty() {
        let _ = timeout(idle_timeout, client.write_all(sbuf.as_slice())).await;
    }
    let _ = client.shutdown().await;
    if !cbuf.is_empty() {
        let _ = timeout(idle_timeout, server.write_all(cbuf.as_slice())).await;
    }
}
