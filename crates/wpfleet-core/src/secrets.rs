//! Database credentials and WordPress salts.
//!
//! Randomness comes from `openssl rand`. The two database passwords are
//! created once per deployment (mode 0600) and reused by every later command;
//! this tool never rotates them.

use crate::error::{FleetError, Result};
use crate::executor::{CommandSpec, ProcessExecutor};
use crate::paths;
use crate::tracker::ChangeTracker;
use std::path::Path;

const MIN_PASSWORD_LEN: usize = 20;
const DRY_RUN_PLACEHOLDER: &str = "dry-run-placeholder-password";

pub const SALT_KEYS: [&str; 8] = [
    "AUTH_KEY",
    "SECURE_AUTH_KEY",
    "LOGGED_IN_KEY",
    "NONCE_KEY",
    "AUTH_SALT",
    "SECURE_AUTH_SALT",
    "LOGGED_IN_SALT",
    "NONCE_SALT",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbSecrets {
    pub password: String,
    pub root_password: String,
}

/// A random alphanumeric password of at least 20 characters.
pub fn generate_password(exec: &dyn ProcessExecutor) -> Result<String> {
    let out = exec.run_checked(&CommandSpec::new("openssl").args(["rand", "-base64", "32"]))?;
    if exec.is_dry() {
        return Ok(DRY_RUN_PLACEHOLDER.to_string());
    }
    let password: String = out
        .stdout
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if password.len() < MIN_PASSWORD_LEN {
        return Err(FleetError::ExternalTool {
            program: "openssl".to_string(),
            code: 0,
            stderr: format!("rand produced only {} usable characters", password.len()),
        });
    }
    Ok(password)
}

/// Reuse existing credentials or generate whichever file is missing.
pub fn ensure(
    tx: &mut ChangeTracker,
    exec: &dyn ProcessExecutor,
    deploy_dir: &Path,
) -> Result<DbSecrets> {
    let mut values = Vec::with_capacity(2);
    for rel in [paths::DB_PASSWORD_FILE, paths::DB_ROOT_PASSWORD_FILE] {
        let path = deploy_dir.join(rel);
        if path.is_file() {
            tracing::debug!(path = %path.display(), "reusing existing secret");
            values.push(std::fs::read_to_string(&path)?.trim().to_string());
            continue;
        }
        let password = generate_password(exec)?;
        tx.write_private(&path, password.as_bytes())?;
        values.push(password);
    }
    let root_password = values.pop().unwrap_or_default();
    let password = values.pop().unwrap_or_default();
    Ok(DbSecrets {
        password,
        root_password,
    })
}

/// PHP `define(...)` lines for the eight WordPress keys and salts.
pub fn wordpress_salts(exec: &dyn ProcessExecutor) -> Result<String> {
    let out = exec.run_checked(&CommandSpec::new("openssl").args(["rand", "-hex", "256"]))?;
    let hex: String = if exec.is_dry() {
        "0".repeat(512)
    } else {
        out.stdout.chars().filter(|c| c.is_ascii_hexdigit()).collect()
    };
    if hex.len() < 512 {
        return Err(FleetError::ExternalTool {
            program: "openssl".to_string(),
            code: 0,
            stderr: format!("rand produced {} hex characters, expected 512", hex.len()),
        });
    }
    let lines: Vec<String> = SALT_KEYS
        .iter()
        .enumerate()
        .map(|(i, key)| format!("define('{key}', '{}');", &hex[i * 64..(i + 1) * 64]))
        .collect();
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CommandOutput;
    use crate::testing::MockExecutor;
    use tempfile::TempDir;

    fn exec_with_rand() -> MockExecutor {
        let exec = MockExecutor::new();
        exec.respond(
            "rand -base64",
            CommandOutput::ok("Zm9vYmFyYmF6cXV4+/=Zm9vYmFyYmF6cXV4MTIzNDU2\n"),
        );
        exec.respond("rand -hex", CommandOutput::ok(format!("{}\n", "ab".repeat(256))));
        exec
    }

    #[test]
    fn password_strips_symbols() {
        let pw = generate_password(&exec_with_rand()).unwrap();
        assert!(pw.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(pw.len() >= MIN_PASSWORD_LEN);
    }

    #[test]
    fn short_rand_output_is_rejected() {
        let exec = MockExecutor::new();
        exec.respond("rand", CommandOutput::ok("abc\n"));
        assert!(generate_password(&exec).is_err());
    }

    #[test]
    fn ensure_generates_once_and_reuses() {
        let dir = TempDir::new().unwrap();
        let exec = exec_with_rand();

        let mut tx = ChangeTracker::begin(dir.path());
        let first = ensure(&mut tx, &exec, dir.path()).unwrap();
        tx.commit();
        assert_eq!(exec.commands().len(), 2);

        let mut tx = ChangeTracker::begin(dir.path());
        let second = ensure(&mut tx, &exec, dir.path()).unwrap();
        tx.commit();
        assert_eq!(first, second);
        assert_eq!(exec.commands().len(), 2, "no new randomness requested");
        let stored = std::fs::read_to_string(dir.path().join(paths::DB_PASSWORD_FILE)).unwrap();
        assert_eq!(stored, first.password);
    }

    #[cfg(unix)]
    #[test]
    fn secret_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let mut tx = ChangeTracker::begin(dir.path());
        ensure(&mut tx, &exec_with_rand(), dir.path()).unwrap();
        tx.commit();
        for rel in [paths::DB_PASSWORD_FILE, paths::DB_ROOT_PASSWORD_FILE] {
            let mode = std::fs::metadata(dir.path().join(rel))
                .unwrap()
                .permissions()
                .mode()
                & 0o777;
            assert_eq!(mode, 0o600, "{rel}");
        }
    }

    #[test]
    fn salts_define_every_key() {
        let salts = wordpress_salts(&exec_with_rand()).unwrap();
        for key in SALT_KEYS {
            assert!(salts.contains(&format!("define('{key}', '")), "{key}");
        }
        assert_eq!(salts.lines().count(), 8);
    }
}
