//! Persisted list of sites (`sites.env`).
//!
//! The file is env-style so it can be sourced by shell tooling:
//!
//! ```text
//! # managed by wpfleet; edit with `wpfleet add` / `wpfleet remove`
//! SITE_COUNT=1
//! SITE1_DOMAIN=example.com
//! SITE1_SHORT=example
//! SITE1_DB_NAME=wp_example
//! SITE1_CACHE_VOLUME=cache_example
//! ```
//!
//! Only `SITE<N>_DOMAIN` is authoritative; derived keys are rewritten from the
//! domain on every save. Order is the numeric order of `N`.

use crate::error::{FleetError, Result};
use crate::site::Site;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

const HEADER: &str = "# managed by wpfleet; edit with `wpfleet add` / `wpfleet remove`";

static DOMAIN_KEY_RE: OnceLock<Regex> = OnceLock::new();

fn domain_key_re() -> &'static Regex {
    DOMAIN_KEY_RE.get_or_init(|| Regex::new(r"^SITE(\d+)_DOMAIN=(.*)$").unwrap())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    sites: Vec<Site>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut numbered: Vec<(u32, Site)> = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            let Some(caps) = domain_key_re().captures(line) else {
                continue;
            };
            let index: u32 = caps[1].parse().map_err(|_| {
                FleetError::InvalidInput(format!("sites.env line {}: bad index", lineno + 1))
            })?;
            let value = caps[2].trim().trim_matches('"');
            let site = Site::new(value).map_err(|_| {
                FleetError::InvalidInput(format!(
                    "sites.env line {}: invalid domain '{value}'",
                    lineno + 1
                ))
            })?;
            numbered.push((index, site));
        }
        numbered.sort_by_key(|(index, _)| *index);

        let mut registry = Self::new();
        for (_, site) in numbered {
            registry.add(site)?;
        }
        Ok(registry)
    }

    pub fn to_env(&self) -> String {
        let mut out = String::new();
        out.push_str(HEADER);
        out.push('\n');
        out.push_str(&format!("SITE_COUNT={}\n", self.sites.len()));
        for (i, site) in self.sites.iter().enumerate() {
            let n = i + 1;
            out.push_str(&format!("SITE{n}_DOMAIN={}\n", site.domain));
            out.push_str(&format!("SITE{n}_SHORT={}\n", site.short_name));
            out.push_str(&format!("SITE{n}_DB_NAME={}\n", site.database_name));
            out.push_str(&format!("SITE{n}_CACHE_VOLUME={}\n", site.cache_volume_name));
        }
        out
    }

    // ---------------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------------

    pub fn list(&self) -> &[Site] {
        &self.sites
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn exists(&self, domain: &str) -> bool {
        self.get(domain).is_some()
    }

    pub fn get(&self, domain: &str) -> Option<&Site> {
        let domain = domain.trim().to_ascii_lowercase();
        self.sites.iter().find(|s| s.domain == domain)
    }

    // ---------------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------------

    pub fn add(&mut self, site: Site) -> Result<()> {
        if let Some(existing) = self.sites.iter().find(|s| s.collides_with(&site)) {
            let reason = if existing.domain == site.domain {
                site.domain.clone()
            } else {
                format!(
                    "{} (short name '{}' already used by {})",
                    site.domain, site.short_name, existing.domain
                )
            };
            return Err(FleetError::DuplicateSite(reason));
        }
        self.sites.push(site);
        Ok(())
    }

    pub fn remove(&mut self, domain: &str) -> Result<Site> {
        let needle = domain.trim().to_ascii_lowercase();
        let pos = self
            .sites
            .iter()
            .position(|s| s.domain == needle)
            .ok_or_else(|| FleetError::SiteNotFound(domain.to_string()))?;
        Ok(self.sites.remove(pos))
    }
}
