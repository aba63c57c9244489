//! Built-in configuration templates.
//!
//! Any template can be overridden by dropping a file with the same name into
//! `<root>/templates/`. Templates are read-only inputs; rendered copies land in
//! the deployment directory.

use crate::error::Result;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    NginxConf,
    Vhost,
    CacheConf,
    CacheZone,
    PhpDockerfile,
    PhpPool,
    MysqlDatabase,
    WpConfig,
}

impl Template {
    /// File name looked up in the override directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            Template::NginxConf => "nginx.conf",
            Template::Vhost => "vhost.conf",
            Template::CacheConf => "cache.conf",
            Template::CacheZone => "cache-zone.conf",
            Template::PhpDockerfile => "Dockerfile",
            Template::PhpPool => "php-pool.conf",
            Template::MysqlDatabase => "database.sql",
            Template::WpConfig => "wp-config.php",
        }
    }

    pub fn builtin(&self) -> &'static str {
        match self {
            Template::NginxConf => NGINX_CONF,
            Template::Vhost => VHOST,
            Template::CacheConf => CACHE_CONF,
            Template::CacheZone => CACHE_ZONE,
            Template::PhpDockerfile => PHP_DOCKERFILE,
            Template::PhpPool => PHP_POOL,
            Template::MysqlDatabase => MYSQL_DATABASE,
            Template::WpConfig => WP_CONFIG,
        }
    }
}

/// Resolves templates from an optional override directory, falling back to
/// the built-in copies.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    override_dir: Option<PathBuf>,
}

impl TemplateStore {
    pub fn with_overrides(dir: impl Into<PathBuf>) -> Self {
        Self {
            override_dir: Some(dir.into()),
        }
    }

    pub fn load(&self, template: Template) -> Result<String> {
        if let Some(dir) = &self.override_dir {
            let path = dir.join(template.file_name());
            if path.is_file() {
                tracing::debug!(path = %path.display(), "using template override");
                return Ok(std::fs::read_to_string(&path)?);
            }
        }
        Ok(template.builtin().to_string())
    }
}

// ---------------------------------------------------------------------------
// Markers
// ---------------------------------------------------------------------------

/// Opening marker for the zone block inside the cache config.
pub const ZONES_START: &str = "# wpfleet:zones:start";
/// Closing marker for the zone block inside the cache config.
pub const ZONES_END: &str = "# wpfleet:zones:end";

// ---------------------------------------------------------------------------
// Built-in content
// ---------------------------------------------------------------------------

const NGINX_CONF: &str = r#"user nginx;
worker_processes auto;
error_log /var/log/nginx/error.log warn;
pid /var/run/nginx.pid;

events {
    worker_connections 1024;
}

http {
    include /etc/nginx/mime.types;
    default_type application/octet-stream;

    sendfile on;
    tcp_nopush on;
    keepalive_timeout 65;
    client_max_body_size 64m;
    server_tokens off;

    gzip on;
    gzip_types text/plain text/css application/json application/javascript text/xml application/xml image/svg+xml;

    ssl_protocols TLSv1.2 TLSv1.3;
    ssl_prefer_server_ciphers off;
    ssl_session_cache shared:SSL:10m;
    ssl_session_timeout 1d;

    include /etc/nginx/conf.d/*.conf;
}
"#;

const VHOST: &str = r#"# {{DOMAIN}} (generated by wpfleet)
server {
    listen 80;
    listen [::]:80;
    server_name {{DOMAIN}} www.{{DOMAIN}};

    location /.well-known/acme-challenge/ {
        root /var/www/certbot;
    }

    location / {
        return 301 https://$host$request_uri;
    }
}

server {
    listen 443 ssl;
    listen [::]:443 ssl;
    http2 on;
    server_name {{DOMAIN}} www.{{DOMAIN}};

    ssl_certificate     /etc/nginx/certs/{{DOMAIN}}/fullchain.pem;
    ssl_certificate_key /etc/nginx/certs/{{DOMAIN}}/privkey.pem;

    root /var/www/{{SHORT}};
    index index.php;

    set $skip_cache 0;
    if ($request_method = POST) { set $skip_cache 1; }
    if ($query_string != "") { set $skip_cache 1; }
    if ($request_uri ~* "/wp-admin/|/xmlrpc.php|wp-.*.php|/feed/|sitemap(_index)?.xml") { set $skip_cache 1; }
    if ($http_cookie ~* "comment_author|wordpress_[a-f0-9]+|wp-postpass|wordpress_no_cache|wordpress_logged_in") { set $skip_cache 1; }

    location / {
        try_files $uri $uri/ /index.php?$args;
    }

    location ~ \.php$ {
        try_files $uri =404;
        fastcgi_pass php_{{SHORT}}:9000;
        fastcgi_index index.php;
        include fastcgi_params;
        fastcgi_param SCRIPT_FILENAME /var/www/html$fastcgi_script_name;
        fastcgi_param HTTPS on;

        fastcgi_cache {{UPPER}};
        fastcgi_cache_valid 200 301 302 60m;
        fastcgi_cache_bypass $skip_cache;
        fastcgi_no_cache $skip_cache;
        add_header X-FastCGI-Cache $upstream_cache_status;
    }

    location ~* \.(css|js|gif|ico|jpe?g|png|svg|webp|woff2?)$ {
        expires 30d;
        access_log off;
    }

    location ~ /\.(ht|git) {
        deny all;
    }
}
"#;

const CACHE_CONF: &str = r#"# FastCGI cache zones, one per site (managed by wpfleet)
fastcgi_cache_key "$scheme$request_method$host$request_uri";
fastcgi_cache_use_stale error timeout invalid_header http_500;
fastcgi_ignore_headers Cache-Control Expires Set-Cookie;

# wpfleet:zones:start
# wpfleet:zones:end
"#;

const CACHE_ZONE: &str = "fastcgi_cache_path /var/cache/nginx/{{SHORT}} levels=1:2 keys_zone={{UPPER}}:100m inactive=60m max_size=1g;\n";

const PHP_DOCKERFILE: &str = r#"FROM php:{{PHP_VERSION}}-fpm-alpine

RUN apk add --no-cache fcgi libpng libjpeg-turbo libzip icu-libs \
    && apk add --no-cache --virtual .build-deps $PHPIZE_DEPS libpng-dev libjpeg-turbo-dev libzip-dev icu-dev \
    && docker-php-ext-configure gd --with-jpeg \
    && docker-php-ext-install -j"$(nproc)" mysqli pdo_mysql gd zip intl opcache exif \
    && pecl install redis \
    && docker-php-ext-enable redis \
    && apk del .build-deps

RUN { \
        echo 'opcache.memory_consumption=128'; \
        echo 'opcache.max_accelerated_files=10000'; \
        echo 'opcache.revalidate_freq=2'; \
    } > /usr/local/etc/php/conf.d/opcache-recommended.ini

WORKDIR /var/www/html
"#;

const PHP_POOL: &str = r#"; PHP-FPM pool for {{DOMAIN}} (generated by wpfleet)
[www]
user = www-data
group = www-data
listen = 9000

pm = dynamic
pm.max_children = 10
pm.start_servers = 2
pm.min_spare_servers = 1
pm.max_spare_servers = 4
pm.max_requests = 500

ping.path = /ping
ping.response = pong

catch_workers_output = yes
clear_env = no

php_admin_value[error_log] = /proc/self/fd/2
php_admin_flag[log_errors] = on
php_admin_value[upload_max_filesize] = 64M
php_admin_value[post_max_size] = 64M
php_value[session.save_handler] = redis
php_value[session.save_path] = "tcp://redis_{{SHORT}}:6379"
"#;

const MYSQL_DATABASE: &str = r#"-- {{DOMAIN}}
CREATE DATABASE IF NOT EXISTS `{{DB_NAME}}` CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci;
GRANT ALL PRIVILEGES ON `{{DB_NAME}}`.* TO '{{DB_USER}}'@'%';
"#;

const WP_CONFIG: &str = r#"<?php
// {{DOMAIN}} (generated by wpfleet)
define('DB_NAME', '{{DB_NAME}}');
define('DB_USER', '{{DB_USER}}');
define('DB_PASSWORD', trim((string) @file_get_contents('/run/secrets/db_password')));
define('DB_HOST', 'mysql');
define('DB_CHARSET', 'utf8mb4');
define('DB_COLLATE', '');

define('WP_HOME', 'https://{{DOMAIN}}');
define('WP_SITEURL', 'https://{{DOMAIN}}');

define('WP_REDIS_HOST', 'redis_{{SHORT}}');
define('WP_REDIS_PORT', 6379);
define('WP_CACHE_KEY_SALT', '{{DOMAIN}}:');

{{AUTH_SALTS}}

$table_prefix = 'wp_';

define('WP_DEBUG', false);
define('DISALLOW_FILE_EDIT', true);

if (!defined('ABSPATH')) {
    define('ABSPATH', __DIR__ . '/');
}

require_once ABSPATH . 'wp-settings.php';
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{render, unresolved, Tokens};
    use crate::site::Site;
    use tempfile::TempDir;

    #[test]
    fn builtin_vhost_renders_fully_for_a_site() {
        let site = Site::new("example.com").unwrap();
        let out = render(Template::Vhost.builtin(), &Tokens::for_site(&site));
        assert!(unresolved(&out).is_empty(), "left: {:?}", unresolved(&out));
        assert!(out.contains("fastcgi_pass php_example:9000;"));
        assert!(out.contains("fastcgi_cache EXAMPLE;"));
        assert!(out.contains("/etc/nginx/certs/example.com/fullchain.pem"));
    }

    #[test]
    fn cache_skeleton_carries_both_markers() {
        let conf = Template::CacheConf.builtin();
        assert!(conf.contains(ZONES_START));
        assert!(conf.contains(ZONES_END));
    }

    #[test]
    fn override_directory_wins() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("vhost.conf"), "custom {{DOMAIN}}").unwrap();
        let store = TemplateStore::with_overrides(dir.path());
        assert_eq!(store.load(Template::Vhost).unwrap(), "custom {{DOMAIN}}");
        // Templates without an override still come from the binary.
        assert_eq!(store.load(Template::PhpPool).unwrap(), PHP_POOL);
    }

    #[test]
    fn missing_override_dir_falls_back() {
        let store = TemplateStore::with_overrides("/nonexistent/wpfleet/templates");
        assert_eq!(store.load(Template::NginxConf).unwrap(), NGINX_CONF);
    }
}
