use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ImagesConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImagesConfig {
    #[serde(default = "default_nginx_image")]
    pub nginx: String,
    #[serde(default = "default_mysql_image")]
    pub mysql: String,
    #[serde(default = "default_redis_image")]
    pub redis: String,
}

fn default_nginx_image() -> String {
    "nginx:1.27-alpine".to_string()
}

fn default_mysql_image() -> String {
    "mysql:8.0".to_string()
}

fn default_redis_image() -> String {
    "redis:7-alpine".to_string()
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            nginx: default_nginx_image(),
            mysql: default_mysql_image(),
            redis: default_redis_image(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Optional `wpfleet.yaml` at the wpfleet root. Every field has a default, so
/// a missing file is equivalent to an empty one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Contact address passed to the ACME client. Without it registration is
    /// done with `--register-unsafely-without-email`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acme_email: Option<String>,
    /// Use the ACME staging endpoint (untrusted certificates, generous limits).
    #[serde(default)]
    pub acme_staging: bool,
    #[serde(default = "default_letsencrypt_dir")]
    pub letsencrypt_dir: PathBuf,
    /// Five-field cron schedule for renewal jobs.
    #[serde(default = "default_renewal_schedule")]
    pub renewal_schedule: String,
    #[serde(default = "default_wordpress_url")]
    pub wordpress_url: String,
    #[serde(default = "default_php_version")]
    pub php_version: String,
    #[serde(default = "default_db_user")]
    pub db_user: String,
    #[serde(default = "default_redis_maxmemory")]
    pub redis_maxmemory: String,
    #[serde(default)]
    pub images: ImagesConfig,
}

fn default_letsencrypt_dir() -> PathBuf {
    PathBuf::from("/etc/letsencrypt")
}

fn default_renewal_schedule() -> String {
    "0 3 * * *".to_string()
}

fn default_wordpress_url() -> String {
    "https://wordpress.org/latest.tar.gz".to_string()
}

fn default_php_version() -> String {
    "8.2".to_string()
}

fn default_db_user() -> String {
    "wordpress".to_string()
}

fn default_redis_maxmemory() -> String {
    "128mb".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            acme_email: None,
            acme_staging: false,
            letsencrypt_dir: default_letsencrypt_dir(),
            renewal_schedule: default_renewal_schedule(),
            wordpress_url: default_wordpress_url(),
            php_version: default_php_version(),
            db_user: default_db_user(),
            redis_maxmemory: default_redis_maxmemory(),
            images: ImagesConfig::default(),
        }
    }
}

impl Config {
    /// Load `wpfleet.yaml` from `root`, or defaults when it does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&data)?)
    }

    /// Sanity-check values that serde cannot.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        match &self.acme_email {
            None => warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "acme_email is not set; certificates will be requested without a contact address".to_string(),
            }),
            Some(email) if !email.contains('@') => warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("acme_email '{email}' is not an email address"),
            }),
            Some(_) => {}
        }

        let fields = self.renewal_schedule.split_whitespace().count();
        if fields != 5 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "renewal_schedule '{}' has {fields} fields; cron expects 5",
                    self.renewal_schedule
                ),
            });
        }

        if !self.wordpress_url.starts_with("https://") {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "wordpress_url '{}' is not https; the archive is fetched unauthenticated",
                    self.wordpress_url
                ),
            });
        }

        if self.db_user.is_empty() || self.db_user == "root" {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "db_user must be a non-root account name".to_string(),
            });
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.renewal_schedule, "0 3 * * *");
        assert_eq!(cfg.images.mysql, "mysql:8.0");
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "acme_email: ops@example.com\nimages:\n  nginx: nginx:mainline\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.acme_email.as_deref(), Some("ops@example.com"));
        assert_eq!(cfg.images.nginx, "nginx:mainline");
        assert_eq!(cfg.images.redis, "redis:7-alpine");
        assert_eq!(cfg.php_version, "8.2");
    }

    #[test]
    fn load_reads_yaml() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            paths::config_path(dir.path()),
            "acme_email: me@example.com\nacme_staging: true\n",
        )
        .unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.acme_email.as_deref(), Some("me@example.com"));
        assert!(cfg.acme_staging);
        assert_eq!(cfg.php_version, Config::default().php_version);
    }

    #[test]
    fn empty_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(paths::config_path(dir.path()), "\n").unwrap();
        assert_eq!(Config::load(dir.path()).unwrap(), Config::default());
    }

    #[test]
    fn validate_defaults_warns_about_email_only() {
        let warnings = Config::default().validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Warning);
        assert!(warnings[0].message.contains("acme_email"));
    }

    #[test]
    fn validate_bad_schedule() {
        let cfg = Config {
            acme_email: Some("a@b.c".to_string()),
            renewal_schedule: "@daily".to_string(),
            ..Config::default()
        };
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("cron expects 5")));
    }

    #[test]
    fn validate_root_db_user() {
        let cfg = Config {
            acme_email: Some("a@b.c".to_string()),
            db_user: "root".to_string(),
            ..Config::default()
        };
        assert!(cfg.validate().iter().any(|w| w.message.contains("non-root")));
    }
}
