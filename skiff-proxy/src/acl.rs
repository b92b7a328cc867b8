use std::net::IpAddr;

use ipnet::IpNet;

use crate::config::{AclAction, AclRule};
use crate::error::ProxyError;

#[derive(Debug)]
pub struct Acl {
    rules: Vec<CompiledRule>,
}

#[derive(Debug)]
struct CompiledRule {
    action: AclAction,
    pattern: Pattern,
}

#[derive(Debug)]
enum Pattern {
    Network(IpNet),
    Address(IpAddr),
    NameSuffix(String),
}

impl Acl {
    pub fn compile(rules: &[AclRule]) -> Result<Self, ProxyError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let pattern = if let Ok(network) = rule.pattern.parse::<IpNet>() {
                Pattern::Network(network)
            } else if let Ok(address) = rule.pattern.parse::<IpAddr>() {
                Pattern::Address(address)
            } else if rule.pattern.chars().any(|byte| byte.is_ascii_alphabetic()) {
                Pattern::NameSuffix(rule.pattern.to_ascii_lowercase())
            } else {
                return Err(ProxyError::Config(format!(
                    "unusable access rule pattern: {}",
                    rule.pattern
                )));
            };
            compiled.push(CompiledRule {
                action: rule.action,
                pattern,
            });
        }
        Ok(Self { rules: compiled })
    }

    /// First matching rule decides. An empty rule set permits everyone; a
    /// non-empty set denies peers no rule matches.
    pub fn permit(&self, ip: IpAddr, name: &str) -> bool {
        if self.rules.is_empty() {
            return true;
        }
        for rule in &self.rules {
            if rule.pattern.matches(ip, name) {
                return rule.action == AclAction::Allow;
            }
        }
        false
    }
}

impl Pattern {
    fn matches(&self, ip: IpAddr, name: &str) -> bool {
        match self {
            Pattern::Network(network) => network.contains(&ip),
            Pattern::Address(address) => *address == ip,
            Pattern::NameSuffix(suffix) => {
                let name = name.to_ascii_lowercase();
                name == *suffix
                    || (suffix.starts_with('.') && name.ends_with(suffix.as_str()))
                    || name.ends_with(&format!(".{suffix}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use assert_matches::assert_matches;

    use super::Acl;
    use crate::config::{AclAction, AclRule};
    use crate::error::ProxyError;

    fn rule(action: AclAction, pattern: &str) -> AclRule {
        AclRule {
            action,
            pattern: pattern.to_string(),
        }
    }

    fn ip(text: &str) -> IpAddr {
        text.parse().unwrap()
    }

    #[test]
    fn empty_rule_set_permits_everyone() {
        let acl = Acl::compile(&[]).unwrap();
        assert!(acl.permit(ip("203.0.113.9"), "anyone.example.com"));
    }

    #[test]
    fn first_matching_rule_wins() {
        let acl = Acl::compile(&[
            rule(AclAction::Deny, "10.0.0.5"),
            rule(AclAction::Allow, "10.0.0.0/8"),
        ])
        .unwrap();

        assert!(!acl.permit(ip("10.0.0.5"), ""));
        assert!(acl.permit(ip("10.1.2.3"), ""));
    }

    #[test]
    fn unmatched_peer_is_denied_when_rules_exist() {
        let acl = Acl::compile(&[rule(AclAction::Allow, "192.168.0.0/16")]).unwrap();
        assert!(!acl.permit(ip("203.0.113.9"), ""));
    }

    #[test]
    fn matches_cidr_blocks() {
        let acl = Acl::compile(&[rule(AclAction::Allow, "127.0.0.0/8")]).unwrap();
        assert!(acl.permit(ip("127.0.0.1"), ""));
        assert!(!acl.permit(ip("128.0.0.1"), ""));
    }

    #[test]
    fn matches_hostname_suffixes() {
        let acl = Acl::compile(&[rule(AclAction::Allow, "example.com")]).unwrap();
        assert!(acl.permit(ip("203.0.113.9"), "host.example.com"));
        assert!(acl.permit(ip("203.0.113.9"), "example.com"));
        assert!(!acl.permit(ip("203.0.113.9"), "notexample.com"));
    }

    #[test]
    fn rejects_malformed_patterns() {
        let err = Acl::compile(&[rule(AclAction::Allow, "300.1.2.3/99")]).unwrap_err();
        assert_matches!(err, ProxyError::Config(_));
    }
}
