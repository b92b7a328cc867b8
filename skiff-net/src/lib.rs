mod http1;

pub use http1::{
    Header, HeaderStore, ParseError, ProtocolVersion, RequestLine, format_host, format_host_port,
    parse_request_line, split_absolute_url, split_tunnel_target,
};
