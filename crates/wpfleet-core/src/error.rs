use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("not initialized: run 'wpfleet init' for deployment '{0}'")]
    NotInitialized(String),

    #[error("deployment already initialized: {0}")]
    AlreadyInitialized(String),

    #[error("required tool not found on PATH: {0}")]
    PrerequisiteMissing(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid domain '{0}': expected a fully-qualified host name like example.com")]
    InvalidDomain(String),

    #[error("site already registered: {0}")]
    DuplicateSite(String),

    #[error("site not found: {0}")]
    SiteNotFound(String),

    #[error("{program} exited with status {code}: {stderr}")]
    ExternalTool {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("certificate for {domain}: {reason}")]
    Certificate { domain: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;
