use super::types::{ParseError, ProtocolVersion, RequestLine};

const HTTP_PORT: u16 = 80;
const TUNNEL_PORT: u16 = 443;

pub fn parse_request_line(raw: &str) -> Result<RequestLine, ParseError> {
    let mut parts = raw.split_whitespace();
    let method = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let target = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let version_token = parts.next();
    if parts.next().is_some() {
        return Err(ParseError::InvalidRequestLine);
    }

    let version = match version_token {
        Some(token) => parse_protocol_version(token)?,
        None => {
            if !method.eq_ignore_ascii_case("GET") {
                return Err(ParseError::InvalidRequestLine);
            }
            ProtocolVersion::LEGACY
        }
    };

    Ok(RequestLine {
        method: method.to_string(),
        target: target.to_string(),
        version,
    })
}

fn parse_protocol_version(token: &str) -> Result<ProtocolVersion, ParseError> {
    let prefix = token.get(..5).ok_or(ParseError::InvalidVersion)?;
    if !prefix.eq_ignore_ascii_case("HTTP/") {
        return Err(ParseError::InvalidVersion);
    }
    let (major, minor) = token[5..]
        .split_once('.')
        .ok_or(ParseError::InvalidVersion)?;
    let major = major.parse().map_err(|_| ParseError::InvalidVersion)?;
    let minor = minor.parse().map_err(|_| ParseError::InvalidVersion)?;
    Ok(ProtocolVersion { major, minor })
}

pub fn split_absolute_url(rest: &str) -> Result<(String, u16, String), ParseError> {
    let (authority, path) = match rest.find('/') {
        Some(index) => (&rest[..index], rest[index..].to_string()),
        None => (rest, "/".to_string()),
    };
    let (host, port) = split_host_port(strip_credentials(authority), HTTP_PORT)?;
    Ok((host, port, path))
}

pub fn split_tunnel_target(target: &str) -> Result<(String, u16), ParseError> {
    split_host_port(strip_credentials(target), TUNNEL_PORT)
}

fn strip_credentials(authority: &str) -> &str {
    match authority.find('@') {
        Some(index) => &authority[index + 1..],
        None => authority,
    }
}

fn split_host_port(input: &str, default_port: u16) -> Result<(String, u16), ParseError> {
    if let Some(colon) = input.rfind(':') {
        // a ']' after the last colon means the colon sits inside an IPv6 literal
        if !input[colon..].contains(']') {
            let host = strip_brackets(&input[..colon]);
            let port: u16 = input[colon + 1..]
                .parse()
                .map_err(|_| ParseError::InvalidPort)?;
            if port == 0 {
                return Err(ParseError::InvalidPort);
            }
            if host.is_empty() {
                return Err(ParseError::EmptyHost);
            }
            return Ok((host.to_string(), port));
        }
    }

    let host = strip_brackets(input);
    if host.is_empty() {
        return Err(ParseError::EmptyHost);
    }
    Ok((host.to_string(), default_port))
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(host)
}

pub fn format_host(host: &str) -> String {
    if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

pub fn format_host_port(host: &str, port: u16) -> String {
    let host = format_host(host);
    if port == HTTP_PORT || port == TUNNEL_PORT {
        host
    } else {
        format!("{host}:{port}")
    }
}
