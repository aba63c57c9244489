//! `{{TOKEN}}` substitution for configuration templates.
//!
//! Tokens missing from the map are left in place so a template can be filled
//! in several passes. Rendering already-rendered text with the same map
//! changes nothing.

use crate::site::Site;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

static TOKEN_RE: OnceLock<Regex> = OnceLock::new();

fn token_re() -> &'static Regex {
    TOKEN_RE.get_or_init(|| Regex::new(r"\{\{([A-Z][A-Z0-9_]*)\}\}").unwrap())
}

/// Token name (without braces) to replacement value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tokens(BTreeMap<String, String>);

impl Tokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard per-site token set.
    pub fn for_site(site: &Site) -> Self {
        Self::new()
            .with("DOMAIN", &site.domain)
            .with("SHORT", &site.short_name)
            .with("UPPER", &site.zone_name)
            .with("DB_NAME", &site.database_name)
            .with("CACHE_VOLUME", &site.cache_volume_name)
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Replace every known `{{NAME}}` in `template`; unknown tokens pass through.
pub fn render(template: &str, tokens: &Tokens) -> String {
    token_re()
        .replace_all(template, |caps: &regex::Captures<'_>| match tokens.get(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Names of tokens still present in `text`, in order of first appearance.
pub fn unresolved(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in token_re().captures_iter(text) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}
