//! The deployment aggregate: one named environment under the wpfleet root.

use crate::config::Config;
use crate::error::{FleetError, Result};
use crate::paths;
use crate::registry::Registry;
use crate::render::{render, Tokens};
use crate::templates::{Template, TemplateStore};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Deployment {
    pub root: PathBuf,
    pub env: String,
    pub dir: PathBuf,
    pub config: Config,
    pub templates: TemplateStore,
    pub registry: Registry,
}

impl Deployment {
    /// Resolve the deployment without requiring it to exist yet.
    pub fn locate(root: &Path, env: &str) -> Result<Self> {
        paths::validate_env_name(env)?;
        let dir = paths::deployment_dir(root, env);
        let registry_path = dir.join(paths::REGISTRY_FILE);
        let registry = if registry_path.is_file() {
            Registry::load(&registry_path)?
        } else {
            Registry::new()
        };
        Ok(Self {
            root: root.to_path_buf(),
            env: env.to_string(),
            config: Config::load(root)?,
            templates: TemplateStore::with_overrides(paths::templates_dir(root)),
            registry,
            dir,
        })
    }

    /// Open an initialized deployment.
    pub fn open(root: &Path, env: &str) -> Result<Self> {
        let deployment = Self::locate(root, env)?;
        if !deployment.is_initialized() {
            return Err(FleetError::NotInitialized(env.to_string()));
        }
        Ok(deployment)
    }

    /// A deployment is initialized once its registry file exists.
    pub fn is_initialized(&self) -> bool {
        self.registry_path().is_file()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.join(rel)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.path(paths::REGISTRY_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.path(paths::MANIFEST_FILE)
    }

    pub fn has_manifest(&self) -> bool {
        self.manifest_path().is_file()
    }

    /// Load `template` and substitute `tokens`, warning about anything left over.
    pub fn render(&self, template: Template, tokens: &Tokens) -> Result<String> {
        let text = render(&self.templates.load(template)?, tokens);
        let left = crate::render::unresolved(&text);
        if !left.is_empty() {
            tracing::warn!(
                template = template.file_name(),
                "unresolved tokens: {}",
                left.join(", ")
            );
        }
        Ok(text)
    }
}
