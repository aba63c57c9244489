//! Docker Compose manifest generation.
//!
//! The manifest is rebuilt from the site list on every change; nothing from a
//! previous manifest is carried over. Service order is fixed (`nginx`,
//! `mysql`, then each site's `php_*` and `redis_*` in registry order) so the
//! output is byte-stable for the same registry.

use crate::config::Config;
use crate::error::Result;
use crate::site::Site;
use serde::ser::{Serialize, SerializeMap, Serializer};

pub const PROXY_SERVICE: &str = "nginx";
pub const DATABASE_SERVICE: &str = "mysql";
pub const FRONTEND_NETWORK: &str = "frontend";
pub const BACKEND_NETWORK: &str = "backend";
pub const DB_DATA_VOLUME: &str = "db_data";
pub const DB_PASSWORD_SECRET: &str = "db_password";
pub const DB_ROOT_PASSWORD_SECRET: &str = "db_root_password";

const HEADER: &str = "# Generated by wpfleet from sites.env. Do not edit; changes are overwritten.\n";

// ---------------------------------------------------------------------------
// OrderedMap
// ---------------------------------------------------------------------------

/// String-keyed map that serializes in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> OrderedMap<V> {
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        self.0.push((key.into(), value));
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Compose types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ComposeFile {
    pub name: String,
    pub services: OrderedMap<Service>,
    pub volumes: OrderedMap<Volume>,
    pub networks: OrderedMap<Network>,
    pub secrets: OrderedMap<SecretFile>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Service {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<Build>,
    pub restart: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "OrderedMap::is_empty")]
    pub environment: OrderedMap<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
    #[serde(skip_serializing_if = "OrderedMap::is_empty")]
    pub depends_on: OrderedMap<DependsOn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Build {
    pub context: String,
    pub dockerfile: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DependsOn {
    pub condition: String,
}

impl DependsOn {
    fn healthy() -> Self {
        Self {
            condition: "service_healthy".to_string(),
        }
    }

    fn started() -> Self {
        Self {
            condition: "service_started".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Healthcheck {
    pub test: Vec<String>,
    pub interval: String,
    pub timeout: String,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_period: Option<String>,
}

impl Healthcheck {
    fn shell(cmd: &str, retries: u32, start_period: Option<&str>) -> Self {
        Self {
            test: vec!["CMD-SHELL".to_string(), cmd.to_string()],
            interval: "10s".to_string(),
            timeout: "5s".to_string(),
            retries,
            start_period: start_period.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Volume {}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Network {
    pub driver: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SecretFile {
    pub file: String,
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Compose project name for a deployment.
pub fn project_name(env: &str) -> String {
    format!("wpfleet_{}", env.replace('-', "_"))
}

/// Build the full service graph for `sites`. Pure; never fails.
pub fn build(env: &str, sites: &[Site], config: &Config) -> ComposeFile {
    let mut services = OrderedMap::default();
    services.insert(PROXY_SERVICE, proxy_service(sites, config));
    services.insert(DATABASE_SERVICE, database_service(config));
    for site in sites {
        services.insert(site.php_service(), php_service(site, config));
        services.insert(site.redis_service(), redis_service(config));
    }

    let mut volumes = OrderedMap::default();
    volumes.insert(DB_DATA_VOLUME, Volume::default());
    for site in sites {
        volumes.insert(site.cache_volume_name.clone(), Volume::default());
    }

    let mut networks = OrderedMap::default();
    for name in [FRONTEND_NETWORK, BACKEND_NETWORK] {
        networks.insert(
            name,
            Network {
                driver: "bridge".to_string(),
            },
        );
    }

    let mut secrets = OrderedMap::default();
    secrets.insert(
        DB_PASSWORD_SECRET,
        SecretFile {
            file: format!("./{}", crate::paths::DB_PASSWORD_FILE),
        },
    );
    secrets.insert(
        DB_ROOT_PASSWORD_SECRET,
        SecretFile {
            file: format!("./{}", crate::paths::DB_ROOT_PASSWORD_FILE),
        },
    );

    ComposeFile {
        name: project_name(env),
        services,
        volumes,
        networks,
        secrets,
    }
}

/// Serialize a manifest to YAML with the generated-file header.
pub fn render(compose: &ComposeFile) -> Result<String> {
    let body = serde_yaml::to_string(compose)?;
    Ok(format!("{HEADER}{body}"))
}

/// Convenience for `render(&build(..))`.
pub fn generate(env: &str, sites: &[Site], config: &Config) -> Result<String> {
    render(&build(env, sites, config))
}

fn proxy_service(sites: &[Site], config: &Config) -> Service {
    let mut volumes = vec![
        "./nginx/nginx.conf:/etc/nginx/nginx.conf:ro".to_string(),
        "./nginx/conf.d:/etc/nginx/conf.d:ro".to_string(),
        "./certs:/etc/nginx/certs:ro".to_string(),
        "./webroot:/var/www/certbot:ro".to_string(),
    ];
    let mut depends_on = OrderedMap::default();
    for site in sites {
        volumes.push(format!(
            "./sites/{short}:/var/www/{short}:ro",
            short = site.short_name
        ));
        volumes.push(format!(
            "{}:/var/cache/nginx/{}",
            site.cache_volume_name, site.short_name
        ));
        depends_on.insert(site.php_service(), DependsOn::healthy());
    }

    Service {
        image: Some(config.images.nginx.clone()),
        restart: "unless-stopped".to_string(),
        ports: vec!["80:80".to_string(), "443:443".to_string()],
        volumes,
        depends_on,
        networks: vec![FRONTEND_NETWORK.to_string(), BACKEND_NETWORK.to_string()],
        ..Service::default()
    }
}

fn database_service(config: &Config) -> Service {
    let mut environment = OrderedMap::default();
    environment.insert(
        "MYSQL_ROOT_PASSWORD_FILE",
        format!("/run/secrets/{DB_ROOT_PASSWORD_SECRET}"),
    );
    environment.insert("MYSQL_USER", config.db_user.clone());
    environment.insert(
        "MYSQL_PASSWORD_FILE",
        format!("/run/secrets/{DB_PASSWORD_SECRET}"),
    );

    Service {
        image: Some(config.images.mysql.clone()),
        restart: "unless-stopped".to_string(),
        environment,
        volumes: vec![
            format!("{DB_DATA_VOLUME}:/var/lib/mysql"),
            "./mysql/init:/docker-entrypoint-initdb.d:ro".to_string(),
        ],
        secrets: vec![
            DB_PASSWORD_SECRET.to_string(),
            DB_ROOT_PASSWORD_SECRET.to_string(),
        ],
        healthcheck: Some(Healthcheck::shell(
            "mysqladmin ping -h 127.0.0.1 --silent",
            10,
            Some("30s"),
        )),
        networks: vec![BACKEND_NETWORK.to_string()],
        ..Service::default()
    }
}

fn php_service(site: &Site, config: &Config) -> Service {
    let mut environment = OrderedMap::default();
    environment.insert("WORDPRESS_DB_HOST", DATABASE_SERVICE.to_string());
    environment.insert("WORDPRESS_DB_NAME", site.database_name.clone());
    environment.insert("WORDPRESS_DB_USER", config.db_user.clone());
    environment.insert("WP_REDIS_HOST", site.redis_service());

    let mut depends_on = OrderedMap::default();
    depends_on.insert(DATABASE_SERVICE, DependsOn::healthy());
    depends_on.insert(site.redis_service(), DependsOn::started());

    Service {
        build: Some(Build {
            context: "./php".to_string(),
            dockerfile: "Dockerfile".to_string(),
        }),
        restart: "unless-stopped".to_string(),
        environment,
        volumes: vec![
            format!("./sites/{}:/var/www/html", site.short_name),
            format!(
                "./php/pools/{}.conf:/usr/local/etc/php-fpm.d/www.conf:ro",
                site.short_name
            ),
        ],
        secrets: vec![DB_PASSWORD_SECRET.to_string()],
        depends_on,
        healthcheck: Some(Healthcheck::shell(
            "SCRIPT_NAME=/ping SCRIPT_FILENAME=/ping REQUEST_METHOD=GET cgi-fcgi -bind -connect 127.0.0.1:9000 | grep -q pong",
            5,
            Some("20s"),
        )),
        networks: vec![FRONTEND_NETWORK.to_string(), BACKEND_NETWORK.to_string()],
        ..Service::default()
    }
}

fn redis_service(config: &Config) -> Service {
    Service {
        image: Some(config.images.redis.clone()),
        restart: "unless-stopped".to_string(),
        command: vec![
            "redis-server".to_string(),
            "--maxmemory".to_string(),
            config.redis_maxmemory.clone(),
            "--maxmemory-policy".to_string(),
            "allkeys-lru".to_string(),
            "--save".to_string(),
            String::new(),
        ],
        healthcheck: Some(Healthcheck::shell("redis-cli ping | grep -q PONG", 5, None)),
        networks: vec![BACKEND_NETWORK.to_string()],
        ..Service::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;

    fn sites(domains: &[&str]) -> Vec<Site> {
        domains.iter().map(|d| Site::new(d).unwrap()).collect()
    }

    fn parse(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn generation_is_deterministic() {
        let cfg = Config::default();
        let list = sites(&["example.com", "blog.example.org"]);
        let a = generate("production", &list, &cfg).unwrap();
        let b = generate("production", &list, &cfg).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn one_site_has_exactly_one_pair() {
        let compose = build("production", &sites(&["example.com"]), &Config::default());
        let names: Vec<&str> = compose.services.keys().collect();
        assert_eq!(names, vec!["nginx", "mysql", "php_example", "redis_example"]);
        assert!(compose.volumes.get("cache_example").is_some());
    }

    #[test]
    fn proxy_waits_for_every_php_service() {
        let compose = build("production", &sites(&["a.com", "b.com"]), &Config::default());
        let nginx = compose.services.get("nginx").unwrap();
        let deps: Vec<&str> = nginx.depends_on.keys().collect();
        assert_eq!(deps, vec!["php_a", "php_b"]);
        for dep in deps {
            assert_eq!(nginx.depends_on.get(dep).unwrap().condition, "service_healthy");
        }
    }

    #[test]
    fn php_depends_on_database_and_own_cache() {
        let compose = build("production", &sites(&["shop.example.com"]), &Config::default());
        let php = compose.services.get("php_shop").unwrap();
        assert_eq!(php.depends_on.get("mysql").unwrap().condition, "service_healthy");
        assert_eq!(
            php.depends_on.get("redis_shop").unwrap().condition,
            "service_started"
        );
        assert_eq!(php.networks, vec!["frontend", "backend"]);
        assert_eq!(
            php.environment.get("WORDPRESS_DB_NAME").map(String::as_str),
            Some("wp_shop")
        );
    }

    #[test]
    fn rendered_yaml_keeps_service_order() {
        let text = generate("staging", &sites(&["zeta.com", "alpha.com"]), &Config::default())
            .unwrap();
        assert!(text.starts_with("# Generated by wpfleet"));
        let zeta = text.find("php_zeta:").unwrap();
        let alpha = text.find("php_alpha:").unwrap();
        assert!(zeta < alpha, "registry order must be preserved");

        let doc = parse(&text);
        assert_eq!(doc["name"], Value::from("wpfleet_staging"));
        assert_eq!(
            doc["services"]["redis_alpha"]["networks"][0],
            Value::from("backend")
        );
        assert_eq!(
            doc["secrets"]["db_password"]["file"],
            Value::from("./secrets/db_password.txt")
        );
    }

    #[test]
    fn empty_registry_has_no_site_services() {
        let compose = build("production", &[], &Config::default());
        assert_eq!(compose.services.len(), 2);
        let text = render(&compose).unwrap();
        assert!(!text.contains("depends_on"));
    }

    #[test]
    fn project_name_is_compose_safe() {
        assert_eq!(project_name("blue-green"), "wpfleet_blue_green");
    }
}
