//! `docker compose` client bound to one deployment's manifest.

use crate::error::Result;
use crate::executor::{CommandOutput, CommandSpec, ProcessExecutor};
use crate::manifest;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Lets the certificate provisioner free port 80 around an issuance.
pub trait ProxyControl {
    fn stop_proxy(&self) -> Result<()>;
    fn start_proxy(&self) -> Result<()>;
}

/// One row of `docker compose ps`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceStatus {
    #[serde(rename = "Service")]
    pub service: String,
    #[serde(rename = "State")]
    pub state: String,
    #[serde(rename = "Health", default)]
    pub health: String,
}

impl ServiceStatus {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

pub struct Compose<'a> {
    exec: &'a dyn ProcessExecutor,
    deploy_dir: PathBuf,
    project: String,
}

impl<'a> Compose<'a> {
    pub fn new(exec: &'a dyn ProcessExecutor, deploy_dir: &Path, env: &str) -> Self {
        Self {
            exec,
            deploy_dir: deploy_dir.to_path_buf(),
            project: manifest::project_name(env),
        }
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new("docker")
            .args(["compose", "-f"])
            .path_arg(&self.deploy_dir.join(crate::paths::MANIFEST_FILE))
            .args(["-p", self.project.as_str()])
            .current_dir(&self.deploy_dir)
    }

    /// `up -d` for the given services, or for everything when empty.
    pub fn up(&self, services: &[String], build: bool) -> Result<()> {
        let mut cmd = self.command().args(["up", "-d"]);
        if build {
            cmd = cmd.arg("--build");
        }
        self.exec.run_checked(&cmd.args(services.iter().cloned()))?;
        Ok(())
    }

    pub fn stop(&self, services: &[String]) -> Result<()> {
        self.exec
            .run_checked(&self.command().arg("stop").args(services.iter().cloned()))?;
        Ok(())
    }

    /// Stop and remove the containers of `services`.
    pub fn remove(&self, services: &[String]) -> Result<()> {
        self.exec.run_checked(
            &self
                .command()
                .args(["rm", "-f", "-s"])
                .args(services.iter().cloned()),
        )?;
        Ok(())
    }

    pub fn down(&self, volumes: bool) -> Result<()> {
        let mut cmd = self.command().args(["down", "--remove-orphans"]);
        if volumes {
            cmd = cmd.arg("-v");
        }
        self.exec.run_checked(&cmd)?;
        Ok(())
    }

    pub fn restart(&self, service: &str) -> Result<()> {
        self.exec
            .run_checked(&self.command().args(["restart", service]))?;
        Ok(())
    }


    /// Feed `sql` to the MySQL client inside `service` as root.
    pub fn exec_sql(&self, service: &str, sql: &str) -> Result<CommandOutput> {
        let client = format!(
            "mysql -uroot -p\"$(cat /run/secrets/{})\"",
            manifest::DB_ROOT_PASSWORD_SECRET
        );
        self.exec.run_checked(
            &self
                .command()
                .args(["exec", "-T", service, "sh", "-c"])
                .arg(client)
                .stdin(sql),
        )
    }

    /// Container states for the whole project.
    pub fn ps(&self) -> Result<Vec<ServiceStatus>> {
        let out = self
            .exec
            .run_checked(&self.command().args(["ps", "--all", "--format", "json"]))?;
        parse_ps(&out.stdout)
    }
}

impl ProxyControl for Compose<'_> {
    fn stop_proxy(&self) -> Result<()> {
        self.stop(&[manifest::PROXY_SERVICE.to_string()])
    }

    fn start_proxy(&self) -> Result<()> {
        self.up(&[manifest::PROXY_SERVICE.to_string()], false)
    }
}

/// Accepts both the JSON-array output of older Compose releases and the
/// one-object-per-line output of newer ones.
pub fn parse_ps(stdout: &str) -> Result<Vec<ServiceStatus>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    trimmed
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(Into::into))
        .collect()
}
