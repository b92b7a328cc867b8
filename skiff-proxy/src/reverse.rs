use skiff_net::HeaderStore;

use crate::config::ReverseConfig;

/// Maps an inbound path onto the configured reverse targets, longest
/// configured prefix first. Returns the rewritten absolute URL, or None when
/// no mapping applies.
pub fn rewrite_url(config: &ReverseConfig, url: &str) -> Option<String> {
    let mut best: Option<&crate::config::ReversePath> = None;
    for entry in &config.paths {
        if url.starts_with(&entry.path)
            && best.is_none_or(|current| entry.path.len() > current.path.len())
        {
            best = Some(entry);
        }
    }
    best.map(|entry| format!("{}{}", entry.url, &url[entry.path.len()..]))
}

/// Builds an absolute URL for a request that reached the proxy without one,
/// from the Host header and the original target path.
pub fn transparent_url(headers: &HeaderStore, target: &str) -> Option<String> {
    let host = headers.get("host")?;
    if target.starts_with('/') {
        Some(format!("http://{host}{target}"))
    } else {
        Some(format!("http://{host}/{target}"))
    }
}

/// Rewrites an origin redirect back under the public base URL, so clients
/// keep talking to the proxy rather than the internal target.
pub fn rewrite_location(config: &ReverseConfig, location: &str) -> Option<String> {
    let base = config.base_url.as_deref()?;
    for entry in &config.paths {
        if let Some(rest) = location.strip_prefix(entry.url.as_str()) {
            let path = entry.path.strip_prefix('/').unwrap_or(entry.path.as_str());
            return Some(format!("{base}{path}{rest}"));
        }
    }
    None
}
