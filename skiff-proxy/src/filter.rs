use regex::Regex;

use crate::config::{FilterConfig, FilterRule, PatternType};
use crate::error::ProxyError;

#[derive(Debug)]
pub struct Filter {
    rules: Vec<CompiledPattern>,
    default_deny: bool,
}

#[derive(Debug)]
enum CompiledPattern {
    Wildcard(String),
    Regex(Regex),
}

impl Filter {
    pub fn compile(config: &FilterConfig) -> Result<Self, ProxyError> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            rules.push(compile_rule(rule)?);
        }
        Ok(Self {
            rules,
            default_deny: config.default_deny,
        })
    }

    pub fn is_blocked(&self, value: &str) -> bool {
        let value = value.to_ascii_lowercase();
        let matched = self.rules.iter().any(|rule| rule.matches(&value));
        if self.default_deny { !matched } else { matched }
    }
}

fn compile_rule(rule: &FilterRule) -> Result<CompiledPattern, ProxyError> {
    match rule.pattern_type {
        PatternType::Wildcard => Ok(CompiledPattern::Wildcard(
            rule.pattern.to_ascii_lowercase(),
        )),
        PatternType::Regex => Regex::new(&rule.pattern)
            .map(CompiledPattern::Regex)
            .map_err(|err| ProxyError::Config(format!("bad filter pattern: {err}"))),
    }
}

impl CompiledPattern {
    fn matches(&self, value: &str) -> bool {
        match self {
            CompiledPattern::Wildcard(pattern) => wildcard_match(pattern, value),
            CompiledPattern::Regex(pattern) => pattern.is_match(value),
        }
    }
}

fn wildcard_match(pattern: &str, value: &str) -> bool {
    let mut pat_iter = pattern.split('*');
    let mut pos = 0;

    if let Some(prefix) = pat_iter.next() {
        if !value.starts_with(prefix) {
            return false;
        }
        pos += prefix.len();
    }

    for part in pat_iter {
        if part.is_empty() {
            continue;
        }
        match value[pos..].find(part) {
            Some(index) => {
                pos += index + part.len();
            }
            None => return false,
        }
    }

    if !pattern.ends_with('*') {
        if let Some(last) = pattern.split('*').next_back() {
            return value.ends_with(last);
        }
    }

    true
}
