use skiff_net::ProtocolVersion;

pub fn proxy_agent() -> String {
    format!("skiff/{}", env!("CARGO_PKG_VERSION"))
}

/// Renders a complete proxy-generated HTTP response carrying an HTML error
/// document. The status line echoes the client's protocol version.
pub fn render_error(
    version: ProtocolVersion,
    code: u16,
    title: &str,
    details: &[(String, String)],
) -> Vec<u8> {
    let mut detail_rows = String::new();
    for (name, value) in details {
        detail_rows.push_str(&format!("<li><strong>{name}:</strong> {value}</li>\n"));
    }
    let detail_list = if detail_rows.is_empty() {
        String::new()
    } else {
        format!("<ul>\n{detail_rows}</ul>\n")
    };

    let body = format!(
        "<html>\n<head><title>{code} {title}</title></head>\n<body>\n\
         <h1>{title}</h1>\n{detail_list}<hr />\n\
         <p><em>Generated by {agent}</em></p>\n</body>\n</html>\n",
        agent = proxy_agent(),
    );

    response_bytes(version, code, title, "text/html", body.as_bytes())
}

pub fn render_json(version: ProtocolVersion, code: u16, title: &str, body: &str) -> Vec<u8> {
    response_bytes(version, code, title, "application/json", body.as_bytes())
}

fn response_bytes(
    version: ProtocolVersion,
    code: u16,
    title: &str,
    content_type: &str,
    body: &[u8],
) -> Vec<u8> {
    let ProtocolVersion { major, minor } = if version.is_legacy() {
        ProtocolVersion { major: 1, minor: 0 }
    } else {
        version
    };

    let mut response = format!(
        "HTTP/{major}.{minor} {code} {title}\r\n\
         Server: {agent}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {length}\r\n\
         Connection: close\r\n\r\n",
        agent = proxy_agent(),
        length = body.len(),
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}
