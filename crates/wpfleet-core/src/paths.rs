use crate::error::{FleetError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const DEFAULT_ENV: &str = "production";

pub const CONFIG_FILE: &str = "wpfleet.yaml";
pub const TEMPLATES_DIR: &str = "templates";
pub const DEPLOYMENTS_DIR: &str = "deployments";
pub const DOWNLOAD_CACHE_DIR: &str = ".cache";

pub const REGISTRY_FILE: &str = "sites.env";
pub const MANIFEST_FILE: &str = "docker-compose.yml";
pub const NGINX_DIR: &str = "nginx";
pub const NGINX_CONF: &str = "nginx/nginx.conf";
pub const NGINX_CONF_D: &str = "nginx/conf.d";
pub const CACHE_CONF: &str = "nginx/conf.d/00-cache.conf";
pub const PHP_DIR: &str = "php";
pub const PHP_DOCKERFILE: &str = "php/Dockerfile";
pub const PHP_POOLS_DIR: &str = "php/pools";
pub const MYSQL_INIT_DIR: &str = "mysql/init";
pub const MYSQL_INIT_SQL: &str = "mysql/init/01-databases.sql";
pub const SITES_DIR: &str = "sites";
pub const SECRETS_DIR: &str = "secrets";
pub const DB_PASSWORD_FILE: &str = "secrets/db_password.txt";
pub const DB_ROOT_PASSWORD_FILE: &str = "secrets/db_root_password.txt";
pub const CERTS_DIR: &str = "certs";
pub const WEBROOT_DIR: &str = "webroot";
pub const ROLLBACK_DIR: &str = ".rollback";

pub const FULLCHAIN_PEM: &str = "fullchain.pem";
pub const PRIVKEY_PEM: &str = "privkey.pem";
pub const SELF_SIGNED_MARKER: &str = ".self-signed";

/// Directories every deployment carries, relative to the deployment root.
pub const DEPLOYMENT_DIRS: &[&str] = &[
    NGINX_DIR,
    NGINX_CONF_D,
    PHP_DIR,
    PHP_POOLS_DIR,
    MYSQL_INIT_DIR,
    SITES_DIR,
    SECRETS_DIR,
    CERTS_DIR,
    WEBROOT_DIR,
];

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn templates_dir(root: &Path) -> PathBuf {
    root.join(TEMPLATES_DIR)
}

pub fn download_cache_dir(root: &Path) -> PathBuf {
    root.join(DOWNLOAD_CACHE_DIR)
}

pub fn deployment_dir(root: &Path, env: &str) -> PathBuf {
    root.join(DEPLOYMENTS_DIR).join(env)
}

pub fn vhost_path(deploy: &Path, domain: &str) -> PathBuf {
    deploy.join(NGINX_CONF_D).join(format!("{domain}.conf"))
}

pub fn pool_path(deploy: &Path, short: &str) -> PathBuf {
    deploy.join(PHP_POOLS_DIR).join(format!("{short}.conf"))
}

pub fn site_dir(deploy: &Path, short: &str) -> PathBuf {
    deploy.join(SITES_DIR).join(short)
}

pub fn cert_dir(deploy: &Path, domain: &str) -> PathBuf {
    deploy.join(CERTS_DIR).join(domain)
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

/// `wp_<short>` has to fit MySQL's 64-character identifier limit.
pub const MAX_SHORT_NAME_LEN: usize = 61;

static DOMAIN_RE: OnceLock<Regex> = OnceLock::new();
static ENV_RE: OnceLock<Regex> = OnceLock::new();

fn domain_re() -> &'static Regex {
    DOMAIN_RE.get_or_init(|| {
        Regex::new(r"^([a-z0-9]([a-z0-9\-]{0,61}[a-z0-9])?\.)+[a-z0-9]([a-z0-9\-]{0,61}[a-z0-9])?$")
            .unwrap()
    })
}

fn env_re() -> &'static Regex {
    ENV_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_\-]*$").unwrap())
}

/// Lower-case and validate a domain. Returns the normalized form.
pub fn normalize_domain(raw: &str) -> Result<String> {
    let domain = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    let first_label = domain.split('.').next().unwrap_or_default();
    if domain.is_empty()
        || domain.len() > 253
        || first_label.len() > MAX_SHORT_NAME_LEN
        || !domain_re().is_match(&domain)
    {
        return Err(FleetError::InvalidDomain(raw.trim().to_string()));
    }
    Ok(domain)
}

pub fn validate_env_name(env: &str) -> Result<()> {
    if env.len() > 64 || !env_re().is_match(env) {
        return Err(FleetError::InvalidInput(format!(
            "deployment name '{env}' must be lowercase alphanumeric with '-' or '_'"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
