mod grammar;
mod headers;
mod types;

pub use grammar::{
    format_host, format_host_port, parse_request_line, split_absolute_url, split_tunnel_target,
};
pub use headers::{Header, HeaderStore};
pub use types::{ParseError, ProtocolVersion, RequestLine};
