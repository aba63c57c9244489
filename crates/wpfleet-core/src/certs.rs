//! TLS certificates: issuance through certbot, the per-deployment certificate
//! store, and renewal cron jobs.

use crate::compose::ProxyControl;
use crate::config::Config;
use crate::error::{FleetError, Result};
use crate::executor::{CommandSpec, ProcessExecutor};
use crate::io;
use crate::manifest;
use crate::paths;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Certificates this close to expiry are reported as expiring.
const EXPIRY_WARNING_DAYS: i64 = 14;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateMaterial {
    pub fullchain: PathBuf,
    pub privkey: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CertStatus {
    Missing,
    SelfSigned,
    Valid { expires: DateTime<Utc>, days_left: i64 },
    Expired { expires: DateTime<Utc> },
    Unknown { reason: String },
}

impl CertStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, CertStatus::Valid { .. })
    }

    pub fn is_expiring(&self) -> bool {
        matches!(self, CertStatus::Valid { days_left, .. } if *days_left <= EXPIRY_WARNING_DAYS)
    }
}

impl fmt::Display for CertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertStatus::Missing => f.write_str("missing"),
            CertStatus::SelfSigned => f.write_str("self-signed"),
            CertStatus::Valid { expires, days_left } => {
                write!(f, "valid until {} ({days_left}d)", expires.format("%Y-%m-%d"))
            }
            CertStatus::Expired { expires } => {
                write!(f, "expired {}", expires.format("%Y-%m-%d"))
            }
            CertStatus::Unknown { reason } => write!(f, "unknown ({reason})"),
        }
    }
}

/// A proxy that is not running and needs no coordination, e.g. during `init`
/// before any container has been started.
pub struct NoProxy;

impl ProxyControl for NoProxy {
    fn stop_proxy(&self) -> Result<()> {
        Ok(())
    }

    fn start_proxy(&self) -> Result<()> {
        Ok(())
    }
}

pub struct CertificateProvisioner<'a> {
    exec: &'a dyn ProcessExecutor,
    config: &'a Config,
    deploy_dir: PathBuf,
    env: String,
}

impl<'a> CertificateProvisioner<'a> {
    pub fn new(
        exec: &'a dyn ProcessExecutor,
        config: &'a Config,
        deploy_dir: &Path,
        env: &str,
    ) -> Self {
        Self {
            exec,
            config,
            deploy_dir: deploy_dir.to_path_buf(),
            env: env.to_string(),
        }
    }

    fn store_dir(&self, domain: &str) -> PathBuf {
        paths::cert_dir(&self.deploy_dir, domain)
    }

    fn live_dir(&self, domain: &str) -> PathBuf {
        self.config.letsencrypt_dir.join("live").join(domain)
    }

    // ---------------------------------------------------------------------------
    // Issuance
    // ---------------------------------------------------------------------------

    /// Request a certificate with the standalone authenticator.
    ///
    /// Port 80 must be free, so the proxy is stopped first and started again
    /// afterwards whether or not issuance succeeded.
    pub fn issue(&self, domain: &str, proxy: &dyn ProxyControl) -> Result<CertificateMaterial> {
        if let Err(e) = proxy.stop_proxy() {
            tracing::warn!(domain, "could not stop proxy before issuance: {e}");
        }
        let requested = self.request(domain);
        if let Err(e) = proxy.start_proxy() {
            tracing::warn!(domain, "could not restart proxy after issuance: {e}");
        }
        requested?;
        self.install_material(domain)
    }

    fn request(&self, domain: &str) -> Result<()> {
        let mut cmd = CommandSpec::new("certbot").args([
            "certonly",
            "--standalone",
            "--non-interactive",
            "--agree-tos",
            "--keep-until-expiring",
            "--cert-name",
            domain,
            "-d",
            domain,
        ]);
        cmd = match &self.config.acme_email {
            Some(email) => cmd.args(["-m", email.as_str()]),
            None => cmd.arg("--register-unsafely-without-email"),
        };
        if self.config.acme_staging {
            cmd = cmd.arg("--staging");
        }
        self.exec.run_checked(&cmd).map_err(|e| FleetError::Certificate {
            domain: domain.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Copy the ACME client's live material into the deployment store.
    pub fn install_material(&self, domain: &str) -> Result<CertificateMaterial> {
        let store = self.store_dir(domain);
        let material = CertificateMaterial {
            fullchain: store.join(paths::FULLCHAIN_PEM),
            privkey: store.join(paths::PRIVKEY_PEM),
        };
        if self.exec.is_dry() {
            println!(
                "[dry-run] copy {} -> {}",
                self.live_dir(domain).display(),
                store.display()
            );
            return Ok(material);
        }

        let live = self.live_dir(domain);
        let cert_err = |reason: String| FleetError::Certificate {
            domain: domain.to_string(),
            reason,
        };
        io::ensure_dir(&store)?;
        for (name, dest) in [
            (paths::FULLCHAIN_PEM, &material.fullchain),
            (paths::PRIVKEY_PEM, &material.privkey),
        ] {
            let src = live.join(name);
            std::fs::copy(&src, dest)
                .map_err(|e| cert_err(format!("cannot copy {}: {e}", src.display())))?;
        }
        io::set_owner_only(&material.privkey)?;
        let marker = store.join(paths::SELF_SIGNED_MARKER);
        if marker.exists() {
            std::fs::remove_file(marker)?;
        }
        tracing::info!(domain, "certificate installed");
        Ok(material)
    }

    /// Write a short-lived self-signed placeholder so the proxy can boot.
    pub fn self_signed(&self, domain: &str) -> Result<CertificateMaterial> {
        let store = self.store_dir(domain);
        let material = CertificateMaterial {
            fullchain: store.join(paths::FULLCHAIN_PEM),
            privkey: store.join(paths::PRIVKEY_PEM),
        };
        if !self.exec.is_dry() {
            io::ensure_dir(&store)?;
        }
        let cmd = CommandSpec::new("openssl")
            .args(["req", "-x509", "-nodes", "-newkey", "rsa:2048", "-days", "30"])
            .args(["-subj".to_string(), format!("/CN={domain}")])
            .arg("-keyout")
            .path_arg(&material.privkey)
            .arg("-out")
            .path_arg(&material.fullchain);
        self.exec.run_checked(&cmd).map_err(|e| FleetError::Certificate {
            domain: domain.to_string(),
            reason: e.to_string(),
        })?;
        if !self.exec.is_dry() {
            if material.privkey.exists() {
                io::set_owner_only(&material.privkey)?;
            }
            io::atomic_write(&store.join(paths::SELF_SIGNED_MARKER), b"")?;
        }
        Ok(material)
    }

    // ---------------------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------------------

    pub fn status(&self, domain: &str) -> CertStatus {
        self.status_at(domain, Utc::now())
    }

    pub fn status_at(&self, domain: &str, now: DateTime<Utc>) -> CertStatus {
        let store = self.store_dir(domain);
        let fullchain = store.join(paths::FULLCHAIN_PEM);
        if !fullchain.is_file() {
            return CertStatus::Missing;
        }
        if store.join(paths::SELF_SIGNED_MARKER).exists() {
            return CertStatus::SelfSigned;
        }
        let cmd = CommandSpec::new("openssl")
            .args(["x509", "-enddate", "-noout", "-in"])
            .path_arg(&fullchain);
        let out = match self.exec.run_checked(&cmd) {
            Ok(out) => out,
            Err(e) => {
                return CertStatus::Unknown {
                    reason: e.to_string(),
                }
            }
        };
        match parse_not_after(&out.stdout) {
            Some(expires) if expires <= now => CertStatus::Expired { expires },
            Some(expires) => CertStatus::Valid {
                expires,
                days_left: (expires - now).num_days(),
            },
            None => CertStatus::Unknown {
                reason: format!("unexpected openssl output: {}", out.stdout.trim()),
            },
        }
    }

    // ---------------------------------------------------------------------------
    // Renewal
    // ---------------------------------------------------------------------------

    fn cron_tag(&self, domain: &str) -> String {
        format!("# wpfleet:{}:{domain}", self.env)
    }

    /// The cron line that renews `domain` through the served webroot.
    pub fn renewal_line(&self, domain: &str) -> String {
        let live = self.live_dir(domain);
        let store = self.store_dir(domain);
        let webroot = self.deploy_dir.join(paths::WEBROOT_DIR);
        let manifest = self.deploy_dir.join(paths::MANIFEST_FILE);
        format!(
            "{schedule} certbot certonly --webroot -w {webroot} --cert-name {domain} -d {domain} \
             --non-interactive --quiet --keep-until-expiring \
             && cp {live}/fullchain.pem {live}/privkey.pem {store}/ \
             && chmod 600 {store}/privkey.pem && rm -f {store}/{marker} \
             && docker compose -f {manifest} -p {project} restart nginx {tag}",
            schedule = self.config.renewal_schedule,
            webroot = webroot.display(),
            live = live.display(),
            store = store.display(),
            manifest = manifest.display(),
            marker = paths::SELF_SIGNED_MARKER,
            project = manifest::project_name(&self.env),
            tag = self.cron_tag(domain),
        )
    }

    fn read_crontab(&self) -> Result<String> {
        let out = self.exec.run(&CommandSpec::new("crontab").arg("-l"))?;
        if out.success() {
            return Ok(out.stdout);
        }
        // `crontab -l` exits 1 with "no crontab for <user>" when none exists.
        if out.stderr.contains("no crontab") {
            return Ok(String::new());
        }
        Err(FleetError::ExternalTool {
            program: "crontab".to_string(),
            code: out.code,
            stderr: out.stderr.trim().to_string(),
        })
    }

    fn write_crontab(&self, content: &str) -> Result<()> {
        self.exec
            .run_checked(&CommandSpec::new("crontab").arg("-").stdin(content))?;
        Ok(())
    }

    /// Add the renewal job for `domain`. Returns `false` when one already exists.
    pub fn install_renewal(&self, domain: &str) -> Result<bool> {
        let current = self.read_crontab()?;
        let tag = self.cron_tag(domain);
        if current.lines().any(|l| l.trim_end().ends_with(&tag)) {
            return Ok(false);
        }
        let mut updated = current;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&self.renewal_line(domain));
        updated.push('\n');
        self.write_crontab(&updated)?;
        Ok(true)
    }

    /// Drop the renewal job for `domain`. Returns `false` when none existed.
    pub fn uninstall_renewal(&self, domain: &str) -> Result<bool> {
        let tag = self.cron_tag(domain);
        self.drop_cron_lines(|line| line.trim_end().ends_with(&tag))
    }

    /// Drop every renewal job belonging to this deployment.
    pub fn uninstall_all_renewals(&self) -> Result<bool> {
        let prefix = format!("# wpfleet:{}:", self.env);
        self.drop_cron_lines(|line| line.contains(&prefix))
    }

    fn drop_cron_lines(&self, matches: impl Fn(&str) -> bool) -> Result<bool> {
        let current = self.read_crontab()?;
        let kept: Vec<&str> = current.lines().filter(|l| !matches(l)).collect();
        if kept.len() == current.lines().count() {
            return Ok(false);
        }
        let mut updated = kept.join("\n");
        if !updated.is_empty() {
            updated.push('\n');
        }
        self.write_crontab(&updated)?;
        Ok(true)
    }
}

/// Parse `notAfter=Jan  1 00:00:00 2027 GMT` as printed by `openssl x509 -enddate`.
pub fn parse_not_after(output: &str) -> Option<DateTime<Utc>> {
    let line = output.lines().find(|l| l.starts_with("notAfter="))?;
    let value = line.trim_start_matches("notAfter=");
    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalized, "%b %d %H:%M:%S %Y GMT")
        .ok()
        .map(|naive| naive.and_utc())
}
