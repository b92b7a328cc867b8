use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProxyConfig {
    pub listen: ListenConfig,
    pub timeouts: TimeoutConfig,
    pub max_clients: usize,
    pub relay_buffer_bytes: usize,
    pub bind_address: Option<String>,
    pub via: ViaConfig,
    pub anonymous_headers: Vec<String>,
    pub connect_ports: Vec<u16>,
    pub acl: Vec<AclRule>,
    pub filter: FilterConfig,
    pub upstream: Vec<UpstreamRule>,
    pub reverse: ReverseConfig,
    pub stat_host: Option<String>,
    pub add_headers: Vec<AddedHeader>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub idle_secs: u64,
    pub connect_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ViaConfig {
    pub disabled: bool,
    pub proxy_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AclRule {
    pub action: AclAction,
    pub pattern: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AclAction {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    pub match_urls: bool,
    pub default_deny: bool,
    pub rules: Vec<FilterRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterRule {
    pub pattern_type: PatternType,
    pub pattern: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PatternType {
    Wildcard,
    Regex,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpstreamRule {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ReverseConfig {
    pub paths: Vec<ReversePath>,
    pub base_url: Option<String>,
    pub transparent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReversePath {
    pub path: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddedHeader {
    pub name: String,
    pub value: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            timeouts: TimeoutConfig::default(),
            max_clients: 100,
            relay_buffer_bytes: 64 * 1024,
            bind_address: None,
            via: ViaConfig::default(),
            anonymous_headers: Vec::new(),
            connect_ports: Vec::new(),
            acl: Vec::new(),
            filter: FilterConfig::default(),
            upstream: Vec::new(),
            reverse: ReverseConfig::default(),
            stat_host: None,
            add_headers: Vec::new(),
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8888,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_secs: 600,
            connect_secs: 30,
        }
    }
}
