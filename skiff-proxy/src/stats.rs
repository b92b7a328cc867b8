use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatEvent {
    Open,
    Close,
    BadConnection,
    Refused,
    Denied,
}

#[derive(Debug, Default)]
struct Counters {
    requests: u64,
    bad_connections: u64,
    open: u64,
    refused: u64,
    denied: u64,
    peers: HashMap<String, u64>,
}

/// Shared request counters. Callers only ever fire events at it; it is never
/// consulted for control flow.
#[derive(Debug, Default)]
pub struct Stats {
    inner: Mutex<Counters>,
}

impl Stats {
    pub fn record(&self, event: StatEvent) {
        let Ok(mut counters) = self.inner.lock() else {
            return;
        };
        match event {
            StatEvent::Open => {
                counters.open += 1;
                counters.requests += 1;
            }
            StatEvent::Close => counters.open = counters.open.saturating_sub(1),
            StatEvent::BadConnection => counters.bad_connections += 1,
            StatEvent::Refused => counters.refused += 1,
            StatEvent::Denied => counters.denied += 1,
        }
    }

    pub fn record_peer(&self, host: &str) {
        let Ok(mut counters) = self.inner.lock() else {
            return;
        };
        *counters.peers.entry(host.to_string()).or_insert(0) += 1;
    }

    /// Renders the counters as the stats document and resets them, matching
    /// the one-shot snapshot behavior of the stat host.
    pub fn render_json(&self) -> String {
        let Ok(mut counters) = self.inner.lock() else {
            return "{}".to_string();
        };
        let snapshot = std::mem::take(&mut *counters);
        drop(counters);

        json!({
            "domain": snapshot.peers,
            "connreqs": snapshot.requests,
            "connbads": snapshot.bad_connections,
            "connopens": snapshot.open,
            "connrefused": snapshot.refused,
            "conndenied": snapshot.denied,
        })
        .to_string()
    }
}
