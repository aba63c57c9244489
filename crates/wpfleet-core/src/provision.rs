//! The provisioning flows behind `init`, `add`, `remove`, `list` and `clean`.
//!
//! File mutations run inside a [`ChangeTracker`] and are rolled back when a
//! step fails. Certificate issuance happens after the tracker has committed
//! and is isolated per site: a failed issuance falls back to a self-signed
//! placeholder and never fails the command.

use crate::certs::{CertStatus, CertificateProvisioner, NoProxy};
use crate::compose::{Compose, ProxyControl, ServiceStatus};
use crate::deployment::Deployment;
use crate::error::{FleetError, Result};
use crate::executor::{self, CommandSpec, ProcessExecutor};
use crate::io;
use crate::manifest::{self, DATABASE_SERVICE, PROXY_SERVICE};
use crate::paths;
use crate::registry::Registry;
use crate::render::Tokens;
use crate::secrets;
use crate::site::Site;
use crate::templates::{Template, ZONES_END, ZONES_START};
use crate::tracker::ChangeTracker;
use serde::Serialize;
use std::fmt;
use std::path::Path;

pub const WORDPRESS_ARCHIVE: &str = "wordpress-latest.tar.gz";
pub const WP_CONFIG_FILE: &str = "wp-config.php";

/// Tools every mutating command shells out to.
pub const BASE_TOOLS: &[&str] = &["docker", "openssl", "curl", "tar"];
/// Additional tools needed when certificates are requested.
pub const CERT_TOOLS: &[&str] = &["certbot", "crontab"];

const SQL_HEADER: &str =
    "-- Generated by wpfleet from sites.env; MySQL runs this on first start only.\n";

// ---------------------------------------------------------------------------
// Options and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitOptions {
    /// Bring the stack up once everything is written.
    pub start: bool,
    /// Request certificates and install renewal jobs.
    pub certs: bool,
    /// Continue with an already initialized deployment.
    pub reuse: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            start: true,
            certs: true,
            reuse: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOptions {
    pub certs: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self { certs: true }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    pub drop_database: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CertOutcome {
    Issued,
    /// A valid certificate was already in the store.
    Existing,
    SelfSigned { reason: String },
    Failed { reason: String },
}

impl fmt::Display for CertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertOutcome::Issued => f.write_str("issued"),
            CertOutcome::Existing => f.write_str("existing"),
            CertOutcome::SelfSigned { reason } => write!(f, "self-signed ({reason})"),
            CertOutcome::Failed { reason } => write!(f, "failed ({reason})"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteReport {
    pub domain: String,
    pub short_name: String,
    pub database: String,
    pub certificate: CertOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub deployment: String,
    pub sites: Vec<SiteReport>,
    pub started: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Up,
    Degraded,
    Down,
    Unknown,
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Liveness::Up => "up",
            Liveness::Degraded => "degraded",
            Liveness::Down => "down",
            Liveness::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteStatus {
    pub domain: String,
    pub short_name: String,
    pub database: String,
    pub liveness: Liveness,
    pub certificate: CertStatus,
}

// ---------------------------------------------------------------------------
// Prerequisites
// ---------------------------------------------------------------------------

pub fn required_tools(certs: bool) -> Vec<&'static str> {
    let mut tools = BASE_TOOLS.to_vec();
    if certs {
        tools.extend_from_slice(CERT_TOOLS);
    }
    tools
}

/// Missing tools are fatal, except under `--dry` where they only warn.
pub fn check_prerequisites(exec: &dyn ProcessExecutor, tools: &[&str]) -> Result<()> {
    match executor::require(exec, tools) {
        Err(e) if exec.is_dry() => {
            tracing::warn!("{e}");
            Ok(())
        }
        other => other,
    }
}

fn tracker_for(dep: &Deployment, exec: &dyn ProcessExecutor) -> ChangeTracker {
    if exec.is_dry() {
        ChangeTracker::dry(&dep.dir)
    } else {
        ChangeTracker::begin(&dep.dir)
    }
}

fn ensure_site_dir_free(dep: &Deployment, site: &Site) -> Result<()> {
    let dir = paths::site_dir(&dep.dir, &site.short_name);
    if dir.exists() {
        return Err(FleetError::InvalidInput(format!(
            "{} already exists; remove it before adding {}",
            dir.display(),
            site.domain
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

pub fn init(
    dep: &mut Deployment,
    exec: &dyn ProcessExecutor,
    domains: &[String],
    opts: InitOptions,
) -> Result<InitReport> {
    let was_initialized = dep.is_initialized();
    if was_initialized && !opts.reuse {
        return Err(FleetError::AlreadyInitialized(dep.dir.display().to_string()));
    }

    let mut next = dep.registry.clone();
    let mut staged = Vec::new();
    for raw in domains {
        let site = Site::new(raw)?;
        if opts.reuse && next.exists(&site.domain) {
            tracing::info!(domain = %site.domain, "already registered, skipping");
            continue;
        }
        next.add(site.clone())?;
        staged.push(site);
    }
    check_prerequisites(exec, &required_tools(opts.certs))?;
    for site in &staged {
        ensure_site_dir_free(dep, site)?;
    }

    tracing::info!(env = %dep.env, sites = staged.len(), "initializing deployment");
    let sites = tracker_for(dep, exec).run(|tx| {
        tx.create_dir(&dep.dir)?;
        for rel in paths::DEPLOYMENT_DIRS {
            tx.create_dir(&dep.path(rel))?;
        }
        let base = Tokens::new().with("PHP_VERSION", &dep.config.php_version);
        tx.write(
            &dep.path(paths::NGINX_CONF),
            dep.render(Template::NginxConf, &base)?.as_bytes(),
        )?;
        tx.write(
            &dep.path(paths::PHP_DOCKERFILE),
            dep.render(Template::PhpDockerfile, &base)?.as_bytes(),
        )?;
        secrets::ensure(tx, exec, &dep.dir)?;
        for site in &staged {
            stage_site(dep, tx, exec, site)?;
        }
        regenerate(dep, &next, tx)?;

        // Certificates first so the proxy finds its key material when it boots.
        let compose = Compose::new(exec, &dep.dir, &dep.env);
        let proxy: &dyn ProxyControl = if was_initialized { &compose } else { &NoProxy };
        let sites = staged
            .iter()
            .map(|site| SiteReport {
                domain: site.domain.clone(),
                short_name: site.short_name.clone(),
                database: site.database_name.clone(),
                certificate: provision_certificate(dep, exec, site, proxy, opts.certs),
            })
            .collect::<Vec<_>>();

        if opts.start {
            compose.up(&[], true)?;
        }
        Ok(sites)
    })?;
    dep.registry = next;

    Ok(InitReport {
        deployment: dep.env.clone(),
        sites,
        started: opts.start,
    })
}

// ---------------------------------------------------------------------------
// add
// ---------------------------------------------------------------------------

pub fn add(
    dep: &mut Deployment,
    exec: &dyn ProcessExecutor,
    domain: &str,
    opts: AddOptions,
) -> Result<SiteReport> {
    if !dep.is_initialized() {
        return Err(FleetError::NotInitialized(dep.env.clone()));
    }
    let site = Site::new(domain)?;
    let mut next = dep.registry.clone();
    next.add(site.clone())?;
    check_prerequisites(exec, &required_tools(opts.certs))?;
    ensure_site_dir_free(dep, &site)?;

    tracing::info!(domain = %site.domain, "adding site");
    let compose = Compose::new(exec, &dep.dir, &dep.env);
    tracker_for(dep, exec).run(|tx| {
        stage_site(dep, tx, exec, &site)?;
        regenerate(dep, &next, tx)?;
        compose.up(&site.services(), true)?;
        // The init script only runs against an empty data volume.
        compose.exec_sql(DATABASE_SERVICE, &database_sql(dep, &site)?)?;
        Ok(())
    })?;
    dep.registry = next;

    let certificate = provision_certificate(dep, exec, &site, &compose, opts.certs);
    if let Err(e) = compose.restart(PROXY_SERVICE) {
        tracing::warn!("could not reload {PROXY_SERVICE}: {e}");
    }
    Ok(SiteReport {
        domain: site.domain.clone(),
        short_name: site.short_name.clone(),
        database: site.database_name.clone(),
        certificate,
    })
}

// ---------------------------------------------------------------------------
// remove
// ---------------------------------------------------------------------------

pub fn remove(
    dep: &mut Deployment,
    exec: &dyn ProcessExecutor,
    domain: &str,
    opts: RemoveOptions,
) -> Result<Site> {
    if !dep.is_initialized() {
        return Err(FleetError::NotInitialized(dep.env.clone()));
    }
    let site = paths::normalize_domain(domain)
        .ok()
        .and_then(|d| dep.registry.get(&d).cloned())
        .ok_or_else(|| FleetError::SiteNotFound(domain.trim().to_string()))?;
    let mut next = dep.registry.clone();
    next.remove(&site.domain)?;

    let compose = Compose::new(exec, &dep.dir, &dep.env);
    let deployed = dep.has_manifest();
    if deployed {
        check_prerequisites(exec, &["docker"])?;
        if opts.drop_database {
            compose.exec_sql(
                DATABASE_SERVICE,
                &format!("DROP DATABASE IF EXISTS `{}`;\n", site.database_name),
            )?;
        }
        compose.remove(&site.services())?;
    }

    tracing::info!(domain = %site.domain, "removing site");
    tracker_for(dep, exec).run(|tx| {
        tx.remove_file(&paths::vhost_path(&dep.dir, &site.domain))?;
        tx.remove_file(&paths::pool_path(&dep.dir, &site.short_name))?;
        tx.remove_dir_all(&paths::site_dir(&dep.dir, &site.short_name))?;
        tx.remove_dir_all(&paths::cert_dir(&dep.dir, &site.domain))?;
        regenerate(dep, &next, tx)
    })?;
    dep.registry = next;

    if exec.is_available("crontab") {
        let certs = CertificateProvisioner::new(exec, &dep.config, &dep.dir, &dep.env);
        if let Err(e) = certs.uninstall_renewal(&site.domain) {
            tracing::warn!(domain = %site.domain, "could not remove renewal job: {e}");
        }
    }
    if deployed {
        let volume = format!(
            "{}_{}",
            manifest::project_name(&dep.env),
            site.cache_volume_name
        );
        let rm = CommandSpec::new("docker").args(["volume", "rm", "-f", volume.as_str()]);
        if let Err(e) = exec.run_checked(&rm) {
            tracing::warn!("could not remove volume {volume}: {e}");
        }
        if let Err(e) = compose.restart(PROXY_SERVICE) {
            tracing::warn!("could not reload {PROXY_SERVICE}: {e}");
        }
    }
    Ok(site)
}

/// Remove every registered site, in registry order.
pub fn remove_all(
    dep: &mut Deployment,
    exec: &dyn ProcessExecutor,
    opts: RemoveOptions,
) -> Result<Vec<Site>> {
    let domains: Vec<String> = dep.registry.list().iter().map(|s| s.domain.clone()).collect();
    let mut removed = Vec::with_capacity(domains.len());
    for domain in domains {
        removed.push(remove(dep, exec, &domain, opts)?);
    }
    Ok(removed)
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

/// Registry contents with container liveness and certificate state.
pub fn list(dep: &Deployment, exec: &dyn ProcessExecutor) -> Vec<SiteStatus> {
    let rows = if dep.has_manifest() && exec.is_available("docker") && !dep.registry.is_empty() {
        match Compose::new(exec, &dep.dir, &dep.env).ps() {
            Ok(rows) => Some(rows),
            Err(e) => {
                tracing::warn!("could not query container state: {e}");
                None
            }
        }
    } else {
        None
    };
    let certs = CertificateProvisioner::new(exec, &dep.config, &dep.dir, &dep.env);
    dep.registry
        .list()
        .iter()
        .map(|site| SiteStatus {
            domain: site.domain.clone(),
            short_name: site.short_name.clone(),
            database: site.database_name.clone(),
            liveness: rows
                .as_deref()
                .map_or(Liveness::Unknown, |rows| liveness_of(site, rows)),
            certificate: certs.status(&site.domain),
        })
        .collect()
}

fn liveness_of(site: &Site, rows: &[ServiceStatus]) -> Liveness {
    let services = site.services();
    let matching: Vec<&ServiceStatus> = rows
        .iter()
        .filter(|r| services.contains(&r.service))
        .collect();
    let healthy = |r: &&ServiceStatus| r.is_running() && r.health != "unhealthy";
    if matching.len() == services.len() && matching.iter().all(healthy) {
        Liveness::Up
    } else if matching.iter().any(|r| r.is_running()) {
        Liveness::Degraded
    } else {
        Liveness::Down
    }
}

// ---------------------------------------------------------------------------
// clean
// ---------------------------------------------------------------------------

/// Tear the deployment down completely. Returns `false` if there was nothing to remove.
pub fn clean(dep: &Deployment, exec: &dyn ProcessExecutor) -> Result<bool> {
    if !dep.dir.exists() {
        return Ok(false);
    }
    if dep.has_manifest() && exec.is_available("docker") {
        if let Err(e) = Compose::new(exec, &dep.dir, &dep.env).down(true) {
            tracing::warn!("docker compose down failed: {e}");
        }
    }
    if exec.is_available("crontab") {
        let certs = CertificateProvisioner::new(exec, &dep.config, &dep.dir, &dep.env);
        if let Err(e) = certs.uninstall_all_renewals() {
            tracing::warn!("could not remove renewal jobs: {e}");
        }
    }
    if exec.is_dry() {
        println!("[dry-run] rm -r {}", dep.dir.display());
    } else {
        std::fs::remove_dir_all(&dep.dir)?;
        tracing::info!(dir = %dep.dir.display(), "deployment removed");
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// Site staging
// ---------------------------------------------------------------------------

/// Write everything a site needs on disk: sources, wp-config, vhost and pool.
fn stage_site(
    dep: &Deployment,
    tx: &mut ChangeTracker,
    exec: &dyn ProcessExecutor,
    site: &Site,
) -> Result<()> {
    let site_dir = paths::site_dir(&dep.dir, &site.short_name);
    tx.create_dir(&site_dir)?;
    fetch_wordpress(dep, exec, &site_dir)?;

    let tokens = Tokens::for_site(site)
        .with("DB_USER", &dep.config.db_user)
        .with("AUTH_SALTS", secrets::wordpress_salts(exec)?);
    tx.write(
        &site_dir.join(WP_CONFIG_FILE),
        dep.render(Template::WpConfig, &tokens)?.as_bytes(),
    )?;
    tx.write(
        &paths::vhost_path(&dep.dir, &site.domain),
        dep.render(Template::Vhost, &tokens)?.as_bytes(),
    )?;
    tx.write(
        &paths::pool_path(&dep.dir, &site.short_name),
        dep.render(Template::PhpPool, &tokens)?.as_bytes(),
    )?;
    Ok(())
}

/// Unpack the WordPress release into `dest`, downloading it once per root.
fn fetch_wordpress(dep: &Deployment, exec: &dyn ProcessExecutor, dest: &Path) -> Result<()> {
    let cache = paths::download_cache_dir(&dep.root);
    let archive = cache.join(WORDPRESS_ARCHIVE);
    if !archive.is_file() {
        if !exec.is_dry() {
            io::ensure_dir(&cache)?;
        }
        tracing::info!(url = %dep.config.wordpress_url, "downloading WordPress");
        let partial = cache.join(format!("{WORDPRESS_ARCHIVE}.part"));
        let download = CommandSpec::new("curl")
            .args(["-fsSL", "-o"])
            .path_arg(&partial)
            .arg(dep.config.wordpress_url.as_str());
        if let Err(e) = exec.run_checked(&download) {
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }
        if partial.is_file() {
            std::fs::rename(&partial, &archive)?;
        }
    }
    let unpack = CommandSpec::new("tar")
        .arg("-xzf")
        .path_arg(&archive)
        .args(["--strip-components=1", "-C"])
        .path_arg(dest);
    exec.run_checked(&unpack)?;
    Ok(())
}

fn provision_certificate(
    dep: &Deployment,
    exec: &dyn ProcessExecutor,
    site: &Site,
    proxy: &dyn ProxyControl,
    issue: bool,
) -> CertOutcome {
    let certs = CertificateProvisioner::new(exec, &dep.config, &dep.dir, &dep.env);
    if certs.status(&site.domain).is_usable() {
        return CertOutcome::Existing;
    }
    let reason = if issue {
        match certs.issue(&site.domain, proxy) {
            Ok(_) => {
                if let Err(e) = certs.install_renewal(&site.domain) {
                    tracing::warn!(domain = %site.domain, "could not install renewal job: {e}");
                }
                return CertOutcome::Issued;
            }
            Err(e) => {
                tracing::warn!(domain = %site.domain, "certificate issuance failed: {e}");
                // The renewal job retries through the webroot once DNS resolves.
                if let Err(e) = certs.install_renewal(&site.domain) {
                    tracing::warn!(domain = %site.domain, "could not install renewal job: {e}");
                }
                e.to_string()
            }
        }
    } else {
        "issuance skipped".to_string()
    };
    match certs.self_signed(&site.domain) {
        Ok(_) => CertOutcome::SelfSigned { reason },
        Err(e) => {
            tracing::warn!(domain = %site.domain, "self-signed fallback failed: {e}");
            CertOutcome::Failed {
                reason: format!("{reason}; self-signed fallback: {e}"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Regeneration
// ---------------------------------------------------------------------------

/// Rewrite the registry and every file derived from it.
fn regenerate(dep: &Deployment, registry: &Registry, tx: &mut ChangeTracker) -> Result<()> {
    tx.write(&dep.registry_path(), registry.to_env().as_bytes())?;
    tx.write(
        &dep.path(paths::CACHE_CONF),
        cache_config(dep, registry)?.as_bytes(),
    )?;
    tx.write(
        &dep.path(paths::MYSQL_INIT_SQL),
        init_sql(dep, registry)?.as_bytes(),
    )?;
    let manifest = manifest::generate(&dep.env, registry.list(), &dep.config)?;
    tx.write(&dep.manifest_path(), manifest.as_bytes())?;
    Ok(())
}

/// The cache config with one zone per registered site between the markers.
/// Text outside the markers is kept from the file on disk.
pub fn cache_config(dep: &Deployment, registry: &Registry) -> Result<String> {
    let zones = registry
        .list()
        .iter()
        .map(|site| dep.render(Template::CacheZone, &Tokens::for_site(site)))
        .collect::<Result<Vec<_>>>()?
        .concat();

    let path = dep.path(paths::CACHE_CONF);
    if path.is_file() {
        let current = std::fs::read_to_string(&path)?;
        if let Some(updated) = io::replace_between_markers(&current, ZONES_START, ZONES_END, &zones)
        {
            return Ok(updated);
        }
        tracing::warn!(
            path = %path.display(),
            "zone markers missing, starting from the template"
        );
    }
    let skeleton = dep.templates.load(Template::CacheConf)?;
    io::replace_between_markers(&skeleton, ZONES_START, ZONES_END, &zones).ok_or_else(|| {
        FleetError::InvalidInput(format!(
            "cache template lacks '{ZONES_START}' / '{ZONES_END}' markers"
        ))
    })
}

fn database_block(dep: &Deployment, site: &Site) -> Result<String> {
    let tokens = Tokens::for_site(site).with("DB_USER", &dep.config.db_user);
    dep.render(Template::MysqlDatabase, &tokens)
}

/// SQL creating one site's database on a running server.
pub fn database_sql(dep: &Deployment, site: &Site) -> Result<String> {
    Ok(format!("{}FLUSH PRIVILEGES;\n", database_block(dep, site)?))
}

/// The init script with one database block per registered site.
pub fn init_sql(dep: &Deployment, registry: &Registry) -> Result<String> {
    let mut out = String::from(SQL_HEADER);
    for site in registry.list() {
        out.push('\n');
        out.push_str(&database_block(dep, site)?);
    }
    out.push_str("\nFLUSH PRIVILEGES;\n");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CommandOutput;
    use crate::testing::MockExecutor;
    use tempfile::TempDir;

    fn scripted() -> MockExecutor {
        let exec = MockExecutor::new();
        exec.respond(
            "rand -base64",
            CommandOutput::ok("c2VjcmV0c2VjcmV0c2VjcmV0c2VjcmV0c2VjcmV0\n"),
        );
        exec.respond("rand -hex", CommandOutput::ok("9f".repeat(256)));
        exec
    }

    /// Make `openssl req` leave the files it was asked to write.
    fn writes_self_signed(exec: &MockExecutor) {
        exec.on("req -x509", |cmd| {
            for flag in ["-keyout", "-out"] {
                if let Some(i) = cmd.args.iter().position(|a| a == flag) {
                    std::fs::write(&cmd.args[i + 1], "PEM").unwrap();
                }
            }
            CommandOutput::ok("")
        });
    }

    fn sql_sent(exec: &MockExecutor) -> Vec<String> {
        exec.calls()
            .into_iter()
            .filter(|c| c.args.iter().any(|a| a.contains("mysql")))
            .filter_map(|c| c.stdin)
            .collect()
    }

    fn no_start_no_certs() -> InitOptions {
        InitOptions {
            start: false,
            certs: false,
            reuse: false,
        }
    }

    fn initialized() -> (TempDir, Deployment, MockExecutor) {
        let dir = TempDir::new().unwrap();
        let exec = scripted();
        let mut dep = Deployment::locate(dir.path(), "production").unwrap();
        init(&mut dep, &exec, &[], no_start_no_certs()).unwrap();
        (dir, dep, exec)
    }

    fn read(dep: &Deployment, rel: &str) -> String {
        std::fs::read_to_string(dep.path(rel)).unwrap()
    }

    #[test]
    fn init_lays_out_an_empty_deployment() {
        let (_dir, dep, _exec) = initialized();
        for rel in paths::DEPLOYMENT_DIRS {
            assert!(dep.path(rel).is_dir(), "{rel}");
        }
        assert!(read(&dep, paths::REGISTRY_FILE).contains("SITE_COUNT=0"));
        assert!(read(&dep, paths::PHP_DOCKERFILE).starts_with("FROM php:8.2-fpm-alpine"));
        assert!(read(&dep, paths::CACHE_CONF).contains(ZONES_START));
        assert!(dep.path(paths::DB_PASSWORD_FILE).is_file());
        assert!(dep.has_manifest());
        assert!(!dep.path(paths::ROLLBACK_DIR).exists());
    }

    #[test]
    fn init_twice_is_rejected_unless_reused() {
        let (_dir, mut dep, exec) = initialized();
        let err = init(&mut dep, &exec, &[], no_start_no_certs()).unwrap_err();
        assert!(matches!(err, FleetError::AlreadyInitialized(_)));

        let reuse = InitOptions {
            reuse: true,
            ..no_start_no_certs()
        };
        let report = init(&mut dep, &exec, &["example.com".to_string()], reuse).unwrap();
        assert_eq!(report.sites.len(), 1);
        assert!(dep.registry.exists("example.com"));
    }

    #[test]
    fn missing_tools_stop_init_before_any_write() {
        let dir = TempDir::new().unwrap();
        let exec = MockExecutor::new().without(&["certbot"]);
        let mut dep = Deployment::locate(dir.path(), "production").unwrap();
        let err = init(&mut dep, &exec, &[], InitOptions::default()).unwrap_err();
        assert!(matches!(err, FleetError::PrerequisiteMissing(ref m) if m == "certbot"));
        assert!(!dep.dir.exists());
        assert!(exec.commands().is_empty());
    }

    #[test]
    fn init_issues_certificates_before_starting() {
        let dir = TempDir::new().unwrap();
        let exec = scripted();
        let mut dep = Deployment::locate(dir.path(), "production").unwrap();
        dep.config.letsencrypt_dir = dir.path().join("le");
        let live = dep.config.letsencrypt_dir.join("live").join("example.com");
        std::fs::create_dir_all(&live).unwrap();
        std::fs::write(live.join("fullchain.pem"), "CHAIN").unwrap();
        std::fs::write(live.join("privkey.pem"), "KEY").unwrap();

        let report = init(
            &mut dep,
            &exec,
            &["example.com".to_string()],
            InitOptions::default(),
        )
        .unwrap();

        assert_eq!(report.sites[0].certificate, CertOutcome::Issued);
        assert!(report.started);
        let certbot = exec.position("certbot certonly --standalone").unwrap();
        let up = exec.position("up -d --build").unwrap();
        assert!(certbot < up, "certificate must exist before the proxy starts");
        assert!(exec.ran("crontab -"));
        // Nothing was running yet, so the proxy was never stopped.
        assert!(!exec.ran("stop nginx"));
        assert!(paths::cert_dir(&dep.dir, "example.com")
            .join(paths::PRIVKEY_PEM)
            .is_file());
    }

    #[test]
    fn failed_start_rolls_back_init() {
        let dir = TempDir::new().unwrap();
        let exec = scripted();
        exec.respond(
            "up -d --build",
            CommandOutput::failed(1, "port is already allocated"),
        );
        let mut dep = Deployment::locate(dir.path(), "production").unwrap();
        let opts = InitOptions {
            start: true,
            certs: false,
            reuse: false,
        };

        let err = init(&mut dep, &exec, &["example.com".to_string()], opts).unwrap_err();

        assert!(matches!(err, FleetError::ExternalTool { .. }));
        assert!(!dep.dir.exists());
        assert!(dep.registry.is_empty());
    }

    #[test]
    fn add_example_com_from_empty_registry() {
        let (_dir, mut dep, exec) = initialized();
        exec.respond("certbot", CommandOutput::failed(1, "DNS problem: NXDOMAIN"));
        exec.respond("req -x509", CommandOutput::failed(1, "unable to write key"));

        let report = add(&mut dep, &exec, "Example.com", AddOptions::default()).unwrap();

        assert_eq!(report.short_name, "example");
        assert_eq!(report.database, "wp_example");
        assert!(matches!(report.certificate, CertOutcome::Failed { .. }));

        let manifest = read(&dep, paths::MANIFEST_FILE);
        assert!(manifest.contains("php_example:"));
        assert!(manifest.contains("redis_example:"));
        assert!(read(&dep, paths::CACHE_CONF).contains("keys_zone=EXAMPLE:100m"));
        assert!(read(&dep, paths::MYSQL_INIT_SQL).contains("`wp_example`"));
        assert!(paths::vhost_path(&dep.dir, "example.com").is_file());
        assert!(paths::pool_path(&dep.dir, "example").is_file());
        let wp_config = read(&dep, "sites/example/wp-config.php");
        assert!(wp_config.contains("define('DB_NAME', 'wp_example');"));
        assert!(wp_config.contains("define('AUTH_KEY', '9f9f"));

        assert!(exec.ran("up -d --build php_example redis_example"));
        let sql = sql_sent(&exec);
        assert_eq!(sql.len(), 1);
        assert!(sql[0].contains("CREATE DATABASE IF NOT EXISTS `wp_example`"));

        let statuses = list(&dep, &exec);
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].certificate, CertStatus::Missing);
    }

    #[test]
    fn failed_issuance_falls_back_to_self_signed() {
        let (_dir, mut dep, exec) = initialized();
        exec.respond("certbot", CommandOutput::failed(1, "too many requests"));
        writes_self_signed(&exec);
        let report = add(&mut dep, &exec, "example.com", AddOptions::default()).unwrap();
        assert!(matches!(report.certificate, CertOutcome::SelfSigned { .. }));
        assert_eq!(list(&dep, &exec)[0].certificate, CertStatus::SelfSigned);
        // The proxy is stopped around the standalone challenge.
        let stop = exec.position("stop nginx").unwrap();
        let certbot = exec.position("certbot").unwrap();
        assert!(stop < certbot);
    }

    #[test]
    fn adds_keep_insertion_order() {
        let (_dir, mut dep, exec) = initialized();
        let opts = AddOptions { certs: false };
        add(&mut dep, &exec, "zeta.com", opts).unwrap();
        add(&mut dep, &exec, "alpha.org", opts).unwrap();
        let reloaded = Registry::load(&dep.registry_path()).unwrap();
        let domains: Vec<&str> = reloaded.list().iter().map(|s| s.domain.as_str()).collect();
        assert_eq!(domains, vec!["zeta.com", "alpha.org"]);

        let manifest = read(&dep, paths::MANIFEST_FILE);
        assert!(manifest.find("php_zeta:").unwrap() < manifest.find("php_alpha:").unwrap());
    }

    #[test]
    fn duplicate_and_colliding_sites_are_rejected_before_any_command() {
        let (_dir, mut dep, exec) = initialized();
        let opts = AddOptions { certs: false };
        add(&mut dep, &exec, "example.com", opts).unwrap();
        let before = exec.commands().len();

        let err = add(&mut dep, &exec, "EXAMPLE.com", opts).unwrap_err();
        assert!(matches!(err, FleetError::DuplicateSite(_)));
        let err = add(&mut dep, &exec, "example.org", opts).unwrap_err();
        assert!(matches!(err, FleetError::DuplicateSite(_)));
        assert_eq!(exec.commands().len(), before);
    }

    #[test]
    fn failure_mid_add_rolls_back() {
        let (_dir, mut dep, exec) = initialized();
        let registry_before = read(&dep, paths::REGISTRY_FILE);
        let manifest_before = read(&dep, paths::MANIFEST_FILE);
        exec.respond("exec -T mysql", CommandOutput::failed(1, "ERROR 2002"));

        let err = add(&mut dep, &exec, "example.com", AddOptions::default()).unwrap_err();

        assert!(matches!(err, FleetError::ExternalTool { .. }));
        assert_eq!(read(&dep, paths::REGISTRY_FILE), registry_before);
        assert_eq!(read(&dep, paths::MANIFEST_FILE), manifest_before);
        assert!(!paths::site_dir(&dep.dir, "example").exists());
        assert!(!paths::vhost_path(&dep.dir, "example.com").exists());
        assert!(!dep.path(paths::ROLLBACK_DIR).exists());
        assert!(dep.registry.is_empty());
        assert!(!exec.ran("certbot"));
    }

    #[test]
    fn add_then_remove_restores_every_generated_file() {
        let (_dir, mut dep, exec) = initialized();
        let generated = [
            paths::REGISTRY_FILE,
            paths::MANIFEST_FILE,
            paths::CACHE_CONF,
            paths::MYSQL_INIT_SQL,
        ];
        let before: Vec<String> = generated.iter().map(|rel| read(&dep, rel)).collect();

        add(&mut dep, &exec, "example.com", AddOptions { certs: false }).unwrap();
        let removed = remove(&mut dep, &exec, "example.com", RemoveOptions::default()).unwrap();

        assert_eq!(removed.short_name, "example");
        let after: Vec<String> = generated.iter().map(|rel| read(&dep, rel)).collect();
        assert_eq!(before, after);
        assert!(!paths::site_dir(&dep.dir, "example").exists());
        assert!(!paths::cert_dir(&dep.dir, "example.com").exists());
        assert!(exec.ran("rm -f -s php_example redis_example"));
        assert!(exec.ran("volume rm -f wpfleet_production_cache_example"));
        assert!(!sql_sent(&exec).iter().any(|sql| sql.contains("DROP DATABASE")));
    }

    #[test]
    fn remove_can_drop_the_database() {
        let (_dir, mut dep, exec) = initialized();
        add(&mut dep, &exec, "example.com", AddOptions { certs: false }).unwrap();
        let opts = RemoveOptions {
            drop_database: true,
        };
        remove(&mut dep, &exec, "example.com", opts).unwrap();
        assert!(sql_sent(&exec)
            .iter()
            .any(|sql| sql == "DROP DATABASE IF EXISTS `wp_example`;\n"));
    }

    #[test]
    fn remove_unknown_site() {
        let (_dir, mut dep, exec) = initialized();
        let err = remove(&mut dep, &exec, "nope.com", RemoveOptions::default()).unwrap_err();
        assert!(matches!(err, FleetError::SiteNotFound(ref d) if d == "nope.com"));
    }

    #[test]
    fn remove_all_empties_the_registry() {
        let (_dir, mut dep, exec) = initialized();
        let opts = AddOptions { certs: false };
        add(&mut dep, &exec, "one.com", opts).unwrap();
        add(&mut dep, &exec, "two.com", opts).unwrap();
        let removed = remove_all(&mut dep, &exec, RemoveOptions::default()).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(Registry::load(&dep.registry_path()).unwrap().is_empty());
    }

    #[test]
    fn list_reports_liveness() {
        let (_dir, mut dep, exec) = initialized();
        let opts = AddOptions { certs: false };
        add(&mut dep, &exec, "one.com", opts).unwrap();
        add(&mut dep, &exec, "two.com", opts).unwrap();
        add(&mut dep, &exec, "three.com", opts).unwrap();
        exec.respond(
            "ps --all",
            CommandOutput::ok(
                r#"{"Service":"php_one","State":"running","Health":"healthy"}
{"Service":"redis_one","State":"running","Health":""}
{"Service":"php_two","State":"running","Health":"unhealthy"}
{"Service":"redis_two","State":"running","Health":""}
"#,
            ),
        );
        let liveness: Vec<Liveness> = list(&dep, &exec).iter().map(|s| s.liveness).collect();
        assert_eq!(
            liveness,
            vec![Liveness::Up, Liveness::Degraded, Liveness::Down]
        );
    }

    #[test]
    fn clean_removes_the_deployment() {
        let (_dir, dep, exec) = initialized();
        assert!(clean(&dep, &exec).unwrap());
        assert!(!dep.dir.exists());
        assert!(exec.ran("down --remove-orphans -v"));
        assert!(!clean(&dep, &exec).unwrap());
    }

    #[test]
    fn cache_config_keeps_text_outside_markers() {
        let (_dir, dep, _exec) = initialized();
        let path = dep.path(paths::CACHE_CONF);
        let custom = format!("# local tweak\n{ZONES_START}\nstale\n{ZONES_END}\n");
        std::fs::write(&path, custom).unwrap();
        let mut registry = Registry::new();
        registry.add(Site::new("example.com").unwrap()).unwrap();
        let text = cache_config(&dep, &registry).unwrap();
        assert!(text.starts_with("# local tweak\n"));
        assert!(!text.contains("stale"));
        assert!(text.contains("keys_zone=EXAMPLE:"));
    }
}
