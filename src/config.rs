//! Persisted settings — connection parameters and key policy
//!
//! Settings live in an `appsettings.json`-shaped file:
//!
//! ```json
//! {
//!   "SapConnection": { "Server": "...", "DBPassword": "enc:v1:...", ... },
//!   "KeyPolicy": { "charset": "strict", "maxLen": 50 },
//!   "Logging": { ... }
//! }
//! ```
//!
//! Passwords are stored protected. Loading unprotects them into
//! `ConnectionParams`; saving re-protects them. Unknown sections such as
//! `Logging` are kept as-is across a save.

use crate::error::{ReconError, Result};
use crate::sanitize::SanitizerPolicy;
use crate::types::{ConnectionParams, DbServerType};
use crate::vault::{needs_migration, CredentialVault};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Connection section as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredConnection {
    #[serde(rename = "Server", default)]
    pub server: String,

    #[serde(rename = "DbServerType", default)]
    pub db_server_type: DbServerType,

    #[serde(rename = "DBUserName", default)]
    pub db_user_name: String,

    /// Protected (or legacy plaintext) database password
    #[serde(rename = "DBPassword", default)]
    pub db_password: String,

    #[serde(rename = "CompanyDB", default)]
    pub company_db: String,

    #[serde(rename = "UserName", default)]
    pub user_name: String,

    /// Protected (or legacy plaintext) application password
    #[serde(rename = "Password", default)]
    pub password: String,

    #[serde(rename = "LicenseServer", default)]
    pub license_server: String,

    #[serde(rename = "SLDServer", default)]
    pub sld_server: String,
}

/// Whole settings document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "SapConnection", default)]
    pub connection: StoredConnection,

    #[serde(rename = "KeyPolicy", default)]
    pub policy: SanitizerPolicy,

    /// Host logging section, carried through untouched
    #[serde(rename = "Logging", default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<serde_json::Value>,
}

impl Settings {
    /// Unprotect stored passwords into session-ready parameters
    ///
    /// Fails with `ReconError::Cryptographic` if a protected password
    /// belongs to another scope.
    pub fn connection_params(&self, vault: &dyn CredentialVault) -> Result<ConnectionParams> {
        let c = &self.connection;
        Ok(ConnectionParams {
            server: c.server.clone(),
            db_server_type: c.db_server_type,
            db_user_name: c.db_user_name.clone(),
            db_password: vault.unprotect(&c.db_password)?,
            company_db: c.company_db.clone(),
            user_name: c.user_name.clone(),
            password: vault.unprotect(&c.password)?,
            license_server: c.license_server.clone(),
            sld_server: c.sld_server.clone(),
        })
    }

    /// Replace the connection section, protecting both passwords
    pub fn set_connection(
        &mut self,
        params: &ConnectionParams,
        vault: &dyn CredentialVault,
    ) -> Result<()> {
        self.connection = StoredConnection {
            server: params.server.clone(),
            db_server_type: params.db_server_type,
            db_user_name: params.db_user_name.clone(),
            db_password: vault.protect(&params.db_password)?,
            company_db: params.company_db.clone(),
            user_name: params.user_name.clone(),
            password: vault.protect(&params.password)?,
            license_server: params.license_server.clone(),
            sld_server: params.sld_server.clone(),
        };
        Ok(())
    }

    /// Names of password fields still stored as legacy plaintext
    pub fn legacy_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if needs_migration(&self.connection.db_password) {
            fields.push("DBPassword");
        }
        if needs_migration(&self.connection.password) {
            fields.push("Password");
        }
        fields
    }
}

/// JSON file-backed settings store
///
/// Atomic writes via temp file + rename to prevent corruption.
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings; a missing file is a configuration error
    pub fn load(&self) -> Result<Settings> {
        let json = std::fs::read_to_string(&self.path).map_err(|e| {
            ReconError::Config(format!(
                "Failed to read settings file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let settings: Settings = serde_json::from_str(&json).map_err(|e| {
            ReconError::Config(format!(
                "Failed to parse settings file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let legacy = settings.legacy_fields();
        if !legacy.is_empty() {
            tracing::warn!(
                path = %self.path.display(),
                fields = ?legacy,
                "Settings contain plaintext passwords; they will be protected on next save"
            );
        }

        tracing::debug!(path = %self.path.display(), "Settings loaded");
        Ok(settings)
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        let json = serde_json::to_string_pretty(settings)?;
        write_atomic(&self.path, json.as_bytes(), false)?;
        tracing::debug!(path = %self.path.display(), "Settings saved");
        Ok(())
    }
}

/// Write `contents` to `path` through a sibling temp file and a rename
///
/// With `owner_only`, the temp file is restricted to the owner (Unix) before
/// it replaces `path`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8], owner_only: bool) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            ReconError::Config(format!("Failed to create directory {}: {}", parent.display(), e))
        })?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);

    std::fs::write(&tmp_path, contents).map_err(|e| {
        ReconError::Config(format!("Failed to write {}: {}", tmp_path.display(), e))
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if owner_only {
            std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| {
                    ReconError::Config(format!("Failed to restrict {}: {}", tmp_path.display(), e))
                })?;
        }
    }
    #[cfg(not(unix))]
    let _ = owner_only;

    std::fs::rename(&tmp_path, path).map_err(|e| {
        ReconError::Config(format!(
            "Failed to rename {} to {}: {}",
            tmp_path.display(),
            path.display(),
            e
        ))
    })
}
