use crate::config::UpstreamRule;

/// Picks the upstream proxy for a destination host. Rules are consulted in
/// order; a rule with no domain list matches every host.
pub fn resolve<'rules>(rules: &'rules [UpstreamRule], host: &str) -> Option<&'rules UpstreamRule> {
    rules.iter().find(|rule| {
        rule.domains.is_empty()
            || rule
                .domains
                .iter()
                .any(|domain| domain_matches(domain, host))
    })
}

fn domain_matches(pattern: &str, host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();

    if let Some(domain) = pattern.strip_prefix('.') {
        return host.ends_with(domain) && host != domain;
    }
    host == pattern || host.ends_with(&format!(".{pattern}"))
}
