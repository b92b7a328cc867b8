use std::net::IpAddr;

use uuid::Uuid;

use skiff_net::ProtocolVersion;

use crate::config::UpstreamRule;
use crate::io::LineIo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDocument {
    pub code: u16,
    pub title: String,
    pub details: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub host: String,
    pub port: u16,
    pub path: String,
}

pub struct Connection {
    pub id: Uuid,
    pub peer_ip: IpAddr,
    pub client: LineIo,
    pub server: Option<LineIo>,
    pub version: ProtocolVersion,
    pub tunnel: bool,
    pub upstream: Option<UpstreamRule>,
    pub client_length: Option<u64>,
    pub server_length: Option<u64>,
    pub error: Option<ErrorDocument>,
    pub show_stats: bool,
}

impl Connection {
    pub fn new(id: Uuid, client: LineIo, peer_ip: IpAddr) -> Self {
        Self {
            id,
            peer_ip,
            client,
            server: None,
            version: ProtocolVersion { major: 1, minor: 0 },
            tunnel: false,
            upstream: None,
            client_length: None,
            server_length: None,
            error: None,
            show_stats: false,
        }
    }

    /// The first recorded error wins; later failures on an already-failed
    /// exchange keep the original document.
    pub fn set_error(&mut self, code: u16, title: &str, details: &[(&str, &str)]) {
        if self.error.is_some() {
            return;
        }
        self.error = Some(ErrorDocument {
            code,
            title: title.to_string(),
            details: details
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        });
    }
}
