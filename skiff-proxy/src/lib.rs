mod acl;
mod buffer;
mod config;
mod conn;
mod error;
mod errorpage;
mod establish;
mod filter;
mod headers;
mod io;
mod proxy;
mod relay;
mod reverse;
mod sock;
mod stats;
mod upstream;

pub use config::{
    AclAction, AclRule, AddedHeader, FilterConfig, FilterRule, ListenConfig, PatternType,
    ProxyConfig, ReverseConfig, ReversePath, TimeoutConfig, UpstreamRule, ViaConfig,
};
pub use error::ProxyError;
pub use proxy::Proxy;
