//! Credential protection at rest
//!
//! Secrets stored in settings are tagged `enc:v1:<key-id>:<base64>` where the
//! payload is `nonce || ciphertext` under AES-256-GCM. The cipher key is
//! derived per protection scope with HKDF-SHA256, so a value protected for
//! one user or machine does not decrypt under another. Untagged values are
//! legacy plaintext and pass through unchanged.

use crate::config::write_atomic;
use crate::error::{ReconError, Result};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::RwLock;

/// Marker prefix of protected values
pub const PROTECTED_PREFIX: &str = "enc:v1:";

const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;
const HKDF_INFO: &[u8] = b"a3s-recon-credentials-v1";

/// A plaintext secret held in memory only
///
/// `Debug` and `Display` are redacted. Use `expose` at the point of use.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Who a protected value is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectionScope {
    /// Bound to a user account name
    CurrentUser(String),
    /// Bound to a machine name
    LocalMachine(String),
}

impl ProtectionScope {
    /// Scope of the user running this process
    pub fn current_user() -> Self {
        let name = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        ProtectionScope::CurrentUser(name)
    }

    /// Scope of the machine running this process
    pub fn local_machine() -> Self {
        let name = std::env::var("COMPUTERNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .ok()
            .or_else(|| {
                std::fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|s| s.trim().to_string())
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        ProtectionScope::LocalMachine(name)
    }

    fn salt(&self) -> Vec<u8> {
        match self {
            ProtectionScope::CurrentUser(name) => format!("user:{}", name).into_bytes(),
            ProtectionScope::LocalMachine(name) => format!("machine:{}", name).into_bytes(),
        }
    }
}

/// Reversible protection of secrets stored in settings
pub trait CredentialVault: Send + Sync {
    /// Protect a plaintext secret into a tagged, storable string
    fn protect(&self, plaintext: &Secret) -> Result<String>;

    /// Recover the plaintext of a stored value
    ///
    /// Untagged values are legacy plaintext and are returned unchanged.
    /// Tagged values that fail to decrypt are an error, never a fallback.
    fn unprotect(&self, stored: &str) -> Result<Secret>;
}

/// Check whether a stored value carries the protection tag
pub fn is_protected(stored: &str) -> bool {
    stored.starts_with(PROTECTED_PREFIX)
}

/// Check whether a stored value is non-empty legacy plaintext
pub fn needs_migration(stored: &str) -> bool {
    !stored.is_empty() && !is_protected(stored)
}

/// AES-256-GCM vault with scope-derived keys and key rotation
///
/// Protects with the active key, unprotects with any registered key.
pub struct AesGcmVault {
    scope: ProtectionScope,

    /// Active key ID for protection
    active_key_id: String,

    /// All registered keys (key_id → scope-derived cipher)
    keys: RwLock<HashMap<String, Aes256Gcm>>,
}

impl AesGcmVault {
    /// Create a vault with a single master key
    ///
    /// The key ID must not be empty and must not contain `:`.
    pub fn new(
        key_id: impl Into<String>,
        master_key: &[u8; KEY_LENGTH],
        scope: ProtectionScope,
    ) -> Result<Self> {
        let key_id = key_id.into();
        validate_key_id(&key_id)?;
        let cipher = derive_cipher(master_key, &scope)?;
        let mut keys = HashMap::new();
        keys.insert(key_id.clone(), cipher);

        Ok(Self {
            scope,
            active_key_id: key_id,
            keys: RwLock::new(keys),
        })
    }

    /// Add a master key for unprotection (key rotation)
    pub fn add_key(&self, key_id: impl Into<String>, master_key: &[u8; KEY_LENGTH]) -> Result<()> {
        let key_id = key_id.into();
        validate_key_id(&key_id)?;
        let cipher = derive_cipher(master_key, &self.scope)?;
        let mut keys = self
            .keys
            .write()
            .map_err(|e| ReconError::Cryptographic(format!("Failed to acquire key lock: {}", e)))?;
        keys.insert(key_id, cipher);
        Ok(())
    }

    /// Rotate to a registered key for future protection
    pub fn rotate_to(&mut self, key_id: &str) -> Result<()> {
        let keys = self
            .keys
            .read()
            .map_err(|e| ReconError::Cryptographic(format!("Failed to acquire key lock: {}", e)))?;
        if !keys.contains_key(key_id) {
            return Err(ReconError::Cryptographic(format!(
                "Key '{}' not registered, add it first",
                key_id
            )));
        }
        drop(keys);
        self.active_key_id = key_id.to_string();
        Ok(())
    }

    pub fn active_key_id(&self) -> &str {
        &self.active_key_id
    }

    pub fn scope(&self) -> &ProtectionScope {
        &self.scope
    }
}

impl CredentialVault for AesGcmVault {
    fn protect(&self, plaintext: &Secret) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let keys = self
            .keys
            .read()
            .map_err(|e| ReconError::Cryptographic(format!("Failed to acquire key lock: {}", e)))?;
        let cipher = keys.get(&self.active_key_id).ok_or_else(|| {
            ReconError::Cryptographic(format!("Active key '{}' not found", self.active_key_id))
        })?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.expose().as_bytes())
            .map_err(|e| ReconError::Cryptographic(format!("Encryption failed: {}", e)))?;

        let mut payload = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        Ok(format!(
            "{}{}:{}",
            PROTECTED_PREFIX,
            self.active_key_id,
            BASE64.encode(payload)
        ))
    }

    fn unprotect(&self, stored: &str) -> Result<Secret> {
        if stored.is_empty() {
            return Ok(Secret::default());
        }

        let Some(rest) = stored.strip_prefix(PROTECTED_PREFIX) else {
            tracing::warn!("Credential stored as legacy plaintext; it will be protected on next save");
            return Ok(Secret::new(stored));
        };

        let (key_id, encoded) = rest
            .rsplit_once(':')
            .ok_or_else(|| ReconError::Cryptographic("Malformed protected value".to_string()))?;

        let payload = BASE64
            .decode(encoded)
            .map_err(|e| ReconError::Cryptographic(format!("Invalid payload encoding: {}", e)))?;
        if payload.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(ReconError::Cryptographic(
                "Protected payload too short".to_string(),
            ));
        }

        let keys = self
            .keys
            .read()
            .map_err(|e| ReconError::Cryptographic(format!("Failed to acquire key lock: {}", e)))?;
        let cipher = keys.get(key_id).ok_or_else(|| {
            ReconError::Cryptographic(format!("Decryption key '{}' not registered", key_id))
        })?;

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LENGTH);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                ReconError::Cryptographic(
                    "Decryption failed; value may be protected under another scope".to_string(),
                )
            })?;

        String::from_utf8(plaintext)
            .map(Secret::new)
            .map_err(|e| ReconError::Cryptographic(format!("Decrypted value is not UTF-8: {}", e)))
    }
}

fn validate_key_id(key_id: &str) -> Result<()> {
    if key_id.is_empty() || key_id.contains(':') {
        return Err(ReconError::Validation(format!(
            "Invalid key id '{}': must be non-empty and contain no ':'",
            key_id
        )));
    }
    Ok(())
}

fn derive_cipher(master_key: &[u8; KEY_LENGTH], scope: &ProtectionScope) -> Result<Aes256Gcm> {
    let salt = scope.salt();
    let hkdf = Hkdf::<Sha256>::new(Some(&salt), master_key);
    let mut derived = [0u8; KEY_LENGTH];
    hkdf.expand(HKDF_INFO, &mut derived)
        .map_err(|e| ReconError::Cryptographic(format!("Key derivation failed: {}", e)))?;
    Aes256Gcm::new_from_slice(&derived)
        .map_err(|e| ReconError::Cryptographic(format!("Invalid derived key: {}", e)))
}

/// Load a base64 master key file, creating it with a random key if absent
///
/// New key files are written atomically (temp file + rename) and, on Unix,
/// restricted to the owner.
pub fn load_or_create_key(path: &Path) -> Result<[u8; KEY_LENGTH]> {
    if path.exists() {
        let encoded = std::fs::read_to_string(path).map_err(|e| {
            ReconError::Config(format!("Failed to read key file {}: {}", path.display(), e))
        })?;
        let bytes = BASE64.decode(encoded.trim()).map_err(|e| {
            ReconError::Cryptographic(format!("Invalid key file encoding: {}", e))
        })?;
        if bytes.len() != KEY_LENGTH {
            return Err(ReconError::Cryptographic(format!(
                "Key must be {} bytes, got {}",
                KEY_LENGTH,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&bytes);
        tracing::debug!(path = %path.display(), "Master key loaded");
        return Ok(key);
    }

    let generated = Aes256Gcm::generate_key(&mut OsRng);
    let mut key = [0u8; KEY_LENGTH];
    key.copy_from_slice(generated.as_slice());

    write_atomic(path, BASE64.encode(key).as_bytes(), true)?;

    tracing::info!(path = %path.display(), "Master key created");
    Ok(key)
}
