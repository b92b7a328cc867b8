use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use skiff_net::{
    HeaderStore, RequestLine, parse_request_line, split_absolute_url, split_tunnel_target,
};

use crate::acl::Acl;
use crate::config::ProxyConfig;
use crate::conn::{Connection, Request};
use crate::error::ProxyError;
use crate::errorpage;
use crate::establish;
use crate::filter::Filter;
use crate::headers::{process_client_headers, process_server_headers, read_headers};
use crate::io::LineIo;
use crate::relay::relay_connection;
use crate::reverse;
use crate::sock;
use crate::stats::{StatEvent, Stats};
use crate::upstream;

pub struct Proxy {
    state: Arc<ProxyState>,
}

struct ProxyState {
    config: ProxyConfig,
    acl: Acl,
    filter: Filter,
    stats: Stats,
}

enum Outcome {
    Relay,
    Abort,
}

impl Proxy {
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let acl = Acl::compile(&config.acl)?;
        let filter = Filter::compile(&config.filter)?;
        Ok(Self {
            state: Arc::new(ProxyState {
                config,
                acl,
                filter,
                stats: Stats::default(),
            }),
        })
    }

    pub async fn run(&self) -> Result<(), ProxyError> {
        let listener = sock::listen(
            &self.state.config.listen.host,
            self.state.config.listen.port,
        )
        .await?;
        info!(address = %listener.local_addr()?, "proxy listening");
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<(), ProxyError> {
        let limiter = Arc::new(Semaphore::new(self.state.config.max_clients));
        loop {
            let (stream, peer) = listener.accept().await.map_err(ProxyError::Io)?;
            let Ok(permit) = Arc::clone(&limiter).try_acquire_owned() else {
                self.state.stats.record(StatEvent::Refused);
                warn!(%peer, "connection refused: too many clients");
                continue;
            };
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                handle_connection(state, stream, peer).await;
                drop(permit);
            });
        }
    }
}

async fn handle_connection(state: Arc<ProxyState>, stream: TcpStream, peer: SocketAddr) {
    let id = Uuid::new_v4();
    debug!(%id, %peer, "accepted connection");
    state.stats.record(StatEvent::Open);

    let idle = Duration::from_secs(state.config.timeouts.idle_secs);
    let mut conn = Connection::new(id, LineIo::new(stream, idle), peer.ip());

    match prepare_exchange(&state, &mut conn).await {
        Outcome::Relay => {
            let server_remaining = conn.server_length;
            let (client, client_leftover) = conn.client.into_parts();
            if let Some(server_io) = conn.server {
                let (server, server_leftover) = server_io.into_parts();
                relay_connection(
                    client,
                    client_leftover,
                    server,
                    server_leftover,
                    server_remaining,
                    idle,
                    state.config.relay_buffer_bytes,
                )
                .await;
            }
            info!(%id, "closed connection");
        }
        Outcome::Abort => finish_failed_exchange(&state, conn).await,
    }

    state.stats.record(StatEvent::Close);
}

/// Runs the blocking phases of the exchange: access check, request line,
/// client headers, routing, destination connect, and the header exchange.
/// Every failure leaves the error document (when one applies) on the
/// connection and aborts.
async fn prepare_exchange(state: &ProxyState, conn: &mut Connection) -> Outcome {
    let config = &state.config;

    let peer_name = conn.peer_ip.to_string();
    if !state.acl.permit(conn.peer_ip, &peer_name) {
        state.stats.record(StatEvent::Denied);
        info!(id = %conn.id, peer = %conn.peer_ip, "peer denied by access rules");
        conn.set_error(
            403,
            "Access denied",
            &[(
                "detail",
                "The administrator of this proxy has not configured it to service \
                 requests from your host.",
            )],
        );
        return Outcome::Abort;
    }

    let request_line = match read_request_line(&mut conn.client).await {
        Ok(line) => line,
        Err(err) => {
            debug!(id = %conn.id, %err, "client closed or stalled before the request line");
            state.stats.record(StatEvent::BadConnection);
            conn.set_error(
                408,
                "Timeout",
                &[(
                    "detail",
                    "Server timeout waiting for the HTTP request from the client.",
                )],
            );
            return Outcome::Abort;
        }
    };
    info!(id = %conn.id, request = %request_line, "request");

    let parsed = match parse_request_line(&request_line) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(id = %conn.id, ?err, "bad request line");
            state.stats.record(StatEvent::BadConnection);
            conn.set_error(
                400,
                "Bad Request",
                &[
                    ("detail", "Request has an invalid format"),
                    ("url", request_line.as_str()),
                ],
            );
            return Outcome::Abort;
        }
    };
    conn.version = parsed.version;

    let mut headers = if parsed.version.is_legacy() {
        HeaderStore::new()
    } else {
        match read_headers(&mut conn.client).await {
            Ok(headers) => headers,
            Err(err) => {
                warn!(id = %conn.id, %err, "could not retrieve all the headers from the client");
                state.stats.record(StatEvent::BadConnection);
                conn.set_error(
                    400,
                    "Bad Request",
                    &[(
                        "detail",
                        "Could not retrieve all the headers from the client.",
                    )],
                );
                return Outcome::Abort;
            }
        }
    };
    for extra in &config.add_headers {
        headers.insert(&extra.name, &extra.value);
    }

    let Some(mut request) = route_request(state, conn, &parsed, &headers) else {
        if !conn.show_stats {
            state.stats.record(StatEvent::BadConnection);
        }
        return Outcome::Abort;
    };
    state.stats.record_peer(&request.host);

    let connect_deadline = Duration::from_secs(config.timeouts.connect_secs);
    let idle_deadline = Duration::from_secs(config.timeouts.idle_secs);

    conn.upstream = upstream::resolve(&config.upstream, &request.host).cloned();
    if let Some(upstream_rule) = conn.upstream.clone() {
        match sock::connect(
            &upstream_rule.host,
            upstream_rule.port,
            config.bind_address.as_deref(),
            connect_deadline,
        )
        .await
        {
            Ok(stream) => {
                info!(id = %conn.id, upstream = %upstream_rule.host, "connected to upstream proxy");
                conn.server = Some(LineIo::new(stream, idle_deadline));
                request.path = establish::upstream_path(&request, conn.tunnel);
                if let Err(err) = establish::emit_outbound_request(conn, &request).await {
                    warn!(id = %conn.id, %err, "could not send the request to the upstream proxy");
                    state.stats.record(StatEvent::BadConnection);
                    conn.set_error(
                        503,
                        "Could not send data to remote server",
                        &[(
                            "detail",
                            "A network error occurred while trying to write data to the \
                             upstream web proxy.",
                        )],
                    );
                    return Outcome::Abort;
                }
            }
            Err(err) => {
                warn!(id = %conn.id, %err, "could not connect to the upstream proxy");
                conn.set_error(
                    404,
                    "Unable to connect to upstream proxy",
                    &[(
                        "detail",
                        "A network error occurred while trying to connect to the \
                         upstream web proxy.",
                    )],
                );
                return Outcome::Abort;
            }
        }
    } else {
        match sock::connect(
            &request.host,
            request.port,
            config.bind_address.as_deref(),
            connect_deadline,
        )
        .await
        {
            Ok(stream) => {
                info!(
                    id = %conn.id,
                    host = %request.host,
                    port = request.port,
                    "connected to destination"
                );
                conn.server = Some(LineIo::new(stream, idle_deadline));
                if !conn.tunnel {
                    if let Err(err) = establish::emit_outbound_request(conn, &request).await {
                        warn!(id = %conn.id, %err, "could not send the request line to the destination");
                        state.stats.record(StatEvent::BadConnection);
                        conn.set_error(
                            503,
                            "Could not send data to remote server",
                            &[(
                                "detail",
                                "A network error occurred while trying to write data to \
                                 the remote web server.",
                            )],
                        );
                        return Outcome::Abort;
                    }
                }
            }
            Err(err) => {
                warn!(id = %conn.id, %err, host = %request.host, "could not connect");
                conn.set_error(
                    500,
                    "Unable to connect",
                    &[
                        (
                            "detail",
                            "The proxy was unable to connect to the remote web server.",
                        ),
                        ("error", err.to_string().as_str()),
                    ],
                );
                return Outcome::Abort;
            }
        }
    }

    if let Err(err) = process_client_headers(conn, &mut headers, config).await {
        debug!(id = %conn.id, %err, "failed while forwarding client headers");
        state.stats.record(StatEvent::BadConnection);
        return Outcome::Abort;
    }
    if conn.error.is_some() {
        state.stats.record(StatEvent::BadConnection);
        return Outcome::Abort;
    }

    if conn.tunnel && conn.upstream.is_none() {
        if let Err(err) = establish::emit_tunnel_established(conn).await {
            error!(id = %conn.id, %err, "could not send the tunnel greeting to the client");
            state.stats.record(StatEvent::BadConnection);
            return Outcome::Abort;
        }
    } else if let Err(err) = process_server_headers(conn, config).await {
        debug!(id = %conn.id, %err, "failed while relaying destination headers");
        state.stats.record(StatEvent::BadConnection);
        return Outcome::Abort;
    }

    Outcome::Relay
}

/// Resolves the request target to a destination: reverse mapping first, then
/// the scheme split (absolute URL, CONNECT, transparent fallback), then the
/// tunnel-port, filter, and stat-host policies.
fn route_request(
    state: &ProxyState,
    conn: &mut Connection,
    line: &RequestLine,
    headers: &HeaderStore,
) -> Option<Request> {
    let config = &state.config;
    let mut url = line.target.clone();

    if !config.reverse.paths.is_empty() && url.starts_with('/') {
        match reverse::rewrite_url(&config.reverse, &url) {
            Some(rewritten) => {
                debug!(id = %conn.id, from = %url, to = %rewritten, "reverse path rewrite");
                url = rewritten;
            }
            None => {
                conn.set_error(
                    404,
                    "Not Found",
                    &[
                        (
                            "detail",
                            "The requested path has no configured reverse mapping.",
                        ),
                        ("url", url.as_str()),
                    ],
                );
                return None;
            }
        }
    }

    let lowered = url.to_ascii_lowercase();
    let upstream_configured = !config.upstream.is_empty();
    let request = if lowered.starts_with("http://")
        || (upstream_configured && lowered.starts_with("ftp://"))
    {
        let rest = match url.find("//") {
            Some(index) => &url[index + 2..],
            None => url.as_str(),
        };
        match split_absolute_url(rest) {
            Ok((host, port, path)) => Request {
                method: line.method.clone(),
                host,
                port,
                path,
            },
            Err(err) => {
                debug!(id = %conn.id, ?err, "could not parse the URL");
                conn.set_error(
                    400,
                    "Bad Request",
                    &[("detail", "Could not parse URL"), ("url", url.as_str())],
                );
                return None;
            }
        }
    } else if line.method.to_ascii_uppercase() == "CONNECT" {
        match split_tunnel_target(&url) {
            Ok((host, port)) => {
                if !config.connect_ports.is_empty() && !config.connect_ports.contains(&port) {
                    info!(id = %conn.id, port, "refused CONNECT to disallowed port");
                    conn.set_error(
                        403,
                        "Access violation",
                        &[
                            (
                                "detail",
                                "The CONNECT method is not allowed on the port you \
                                 tried to use.",
                            ),
                            ("url", url.as_str()),
                        ],
                    );
                    return None;
                }
                conn.tunnel = true;
                Request {
                    method: line.method.clone(),
                    host,
                    port,
                    path: String::new(),
                }
            }
            Err(err) => {
                debug!(id = %conn.id, ?err, "could not parse the tunnel target");
                conn.set_error(
                    400,
                    "Bad Request",
                    &[("detail", "Could not parse URL"), ("url", url.as_str())],
                );
                return None;
            }
        }
    } else if config.reverse.transparent {
        let Some(absolute) = reverse::transparent_url(headers, &url) else {
            conn.set_error(
                400,
                "Bad Request",
                &[(
                    "detail",
                    "Unknown destination: the request carries no Host header.",
                )],
            );
            return None;
        };
        match split_absolute_url(&absolute["http://".len()..]) {
            Ok((host, port, path)) => Request {
                method: line.method.clone(),
                host,
                port,
                path,
            },
            Err(err) => {
                debug!(id = %conn.id, ?err, "could not parse the transparent target");
                conn.set_error(
                    400,
                    "Bad Request",
                    &[("detail", "Could not parse URL"), ("url", absolute.as_str())],
                );
                return None;
            }
        }
    } else {
        info!(id = %conn.id, method = %line.method, url = %url, "unknown method or protocol");
        conn.set_error(
            501,
            "Not Implemented",
            &[
                ("detail", "Unknown method or unsupported protocol."),
                ("url", url.as_str()),
            ],
        );
        return None;
    };

    if config.filter.enabled {
        let blocked = if config.filter.match_urls {
            state.filter.is_blocked(&url)
        } else {
            state.filter.is_blocked(&request.host)
        };
        if blocked {
            state.stats.record(StatEvent::Denied);
            info!(id = %conn.id, url = %url, "request refused by filter");
            conn.set_error(
                403,
                "Filtered",
                &[
                    ("detail", "The request you made has been filtered"),
                    ("url", url.as_str()),
                ],
            );
            return None;
        }
    }

    if let Some(stat_host) = &config.stat_host {
        if stat_host.eq_ignore_ascii_case(&request.host) {
            info!(id = %conn.id, "request for the stat host");
            conn.show_stats = true;
            return None;
        }
    }

    Some(request)
}

async fn read_request_line(io: &mut LineIo) -> Result<String, ProxyError> {
    loop {
        let line = io.read_line().await?;
        if !line.is_empty() {
            return Ok(line);
        }
    }
}

/// The terminal path for every failed exchange: drain whatever the client
/// already sent, then write the error document or the stats document before
/// both sockets close.
async fn finish_failed_exchange(state: &ProxyState, mut conn: Connection) {
    conn.client.drain_pending_input();

    if let Some(error) = conn.error.clone() {
        debug!(id = %conn.id, code = error.code, "returning error document");
        let document =
            errorpage::render_error(conn.version, error.code, &error.title, &error.details);
        let _ = conn.client.write_all(&document).await;
    } else if conn.show_stats {
        let body = state.stats.render_json();
        let document = errorpage::render_json(conn.version, 200, "OK", &body);
        let _ = conn.client.write_all(&document).await;
    }
}
