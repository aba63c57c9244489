use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One managed WordPress instance. Every other name is derived from the domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub domain: String,
    pub short_name: String,
    pub database_name: String,
    pub cache_volume_name: String,
    pub zone_name: String,
}

impl Site {
    /// Validate `domain` and derive the site's resource names.
    pub fn new(domain: &str) -> Result<Self> {
        let domain = paths::normalize_domain(domain)?;
        let short_name = short_name_of(&domain).to_string();
        Ok(Self {
            database_name: format!("wp_{short_name}"),
            cache_volume_name: format!("cache_{short_name}"),
            zone_name: short_name.to_ascii_uppercase(),
            short_name,
            domain,
        })
    }

    pub fn php_service(&self) -> String {
        format!("php_{}", self.short_name)
    }

    pub fn redis_service(&self) -> String {
        format!("redis_{}", self.short_name)
    }

    /// Both per-site services, application first.
    pub fn services(&self) -> [String; 2] {
        [self.php_service(), self.redis_service()]
    }

    /// True when this site would clash with `other` in any generated name.
    pub fn collides_with(&self, other: &Site) -> bool {
        self.domain == other.domain
            || self.short_name == other.short_name
            || self.zone_name == other.zone_name
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.domain)
    }
}

fn short_name_of(domain: &str) -> &str {
    domain.split('.').next().unwrap_or(domain)
}
