//! Directory layout and the provisioning record.
//!
//! The provisioning record (`config.json`) maps every role to the SHA-256
//! digest of its token. It is written exactly once by [`provision`] and
//! treated as immutable by the running service.

use std::collections::BTreeMap;
use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::credentials::{CredentialRecord, CredentialVerifier, Role, TokenDigest};
use crate::crypto;
use crate::error::CustosError;
use crate::store::{self, FileStateStore};

/// Default installation root.
pub const DEFAULT_BASE_DIR: &str = "/opt/custos";

/// Filesystem locations used by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustosPaths {
    pub base_dir: PathBuf,
    pub data_dir: PathBuf,
    pub config_file: PathBuf,
    pub secrets_file: PathBuf,
    pub state_file: PathBuf,
    pub access_log: PathBuf,
}

impl CustosPaths {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let data_dir = base_dir.join("data");
        Self {
            config_file: base_dir.join("config.json"),
            secrets_file: data_dir.join(store::SECRETS_FILE_NAME),
            state_file: data_dir.join(store::STATE_FILE_NAME),
            access_log: data_dir.join("access.log"),
            data_dir,
            base_dir,
        }
    }

    /// Open the file-backed state store under `data_dir`.
    pub fn open_store(&self) -> Result<FileStateStore, CustosError> {
        FileStateStore::open(&self.data_dir)
    }
}

impl Default for CustosPaths {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DIR)
    }
}

/// The on-disk provisioning record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Role name → lowercase hex SHA-256 of the role's token.
    pub tokens: BTreeMap<String, String>,
    #[serde(default)]
    pub setup_complete: bool,
    pub created_at: DateTime<Utc>,
}

impl ProvisioningConfig {
    /// Load `config.json`. A missing file means the server was never set up.
    pub fn load(path: &Path) -> Result<Self, CustosError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CustosError::Config(
                    "config file not found, run setup first".to_string(),
                ))
            }
            Err(e) => return Err(CustosError::Config(format!("read config: {e}"))),
        };
        serde_json::from_slice(&bytes).map_err(|e| CustosError::Config(format!("parse config: {e}")))
    }

    /// Build the credential verifier. Unknown roles and malformed digests
    /// are rejected rather than skipped.
    pub fn verifier(&self) -> Result<CredentialVerifier, CustosError> {
        let records = self
            .tokens
            .iter()
            .map(|(name, digest)| {
                Ok(CredentialRecord {
                    role: name.parse()?,
                    digest: TokenDigest::from_hex(digest)?,
                })
            })
            .collect::<Result<Vec<_>, CustosError>>()?;

        if records.is_empty() {
            return Err(CustosError::Config("no tokens configured".to_string()));
        }
        CredentialVerifier::new(records)
    }
}

/// Raw tokens produced by [`provision`]. Wiped on drop.
pub struct ProvisionedTokens {
    tokens: Vec<(Role, Zeroizing<String>)>,
}

impl ProvisionedTokens {
    pub fn get(&self, role: Role) -> Option<&str> {
        self.tokens
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, t)| t.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, &str)> {
        self.tokens.iter().map(|(r, t)| (*r, t.as_str()))
    }

    /// Human-readable handout listing every token once.
    pub fn render_handout(&self, generated: DateTime<Utc>) -> Zeroizing<String> {
        let mut out = String::from("CUSTOS SERVER TOKENS\n===================\n");
        out.push_str(&format!("Generated: {}\n\n", generated.to_rfc3339()));
        for (role, token) in self.iter() {
            let label = match role {
                Role::Primary => "Primary Token (for client)",
                Role::Emergency => "Emergency Token (for admin)",
                Role::Setup => "Setup Token (one-time use)",
            };
            out.push_str(&format!("{label}:\n{token}\n\n"));
        }
        out.push_str("IMPORTANT: Save these tokens in your password manager NOW!\n");
        out.push_str("Delete this file once they are stored.\n");
        Zeroizing::new(out)
    }
}

impl std::fmt::Debug for ProvisionedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionedTokens")
            .field("roles", &self.tokens.iter().map(|(r, _)| *r).collect::<Vec<_>>())
            .finish()
    }
}

/// Generate one token per role and write `config.json` with their digests.
///
/// Refuses to overwrite an existing configuration. The raw tokens are
/// returned to the caller and never written by this function.
pub fn provision(paths: &CustosPaths) -> Result<ProvisionedTokens, CustosError> {
    if paths.config_file.exists() {
        return Err(CustosError::AlreadyProvisioned);
    }
    fs::create_dir_all(&paths.base_dir)
        .map_err(|e| CustosError::storage("create base dir", e))?;
    fs::set_permissions(&paths.base_dir, Permissions::from_mode(0o700))
        .map_err(|e| CustosError::storage("restrict base dir", e))?;

    let mut tokens = Vec::with_capacity(Role::ALL.len());
    for role in Role::ALL {
        tokens.push((role, crypto::generate_token()?));
    }

    let config = ProvisioningConfig {
        tokens: tokens
            .iter()
            .map(|(role, token)| (role.to_string(), TokenDigest::of_token(token).to_hex()))
            .collect(),
        setup_complete: false,
        created_at: Utc::now(),
    };
    let bytes = serde_json::to_vec_pretty(&config)
        .map_err(|e| CustosError::Config(format!("encode config: {e}")))?;
    store::write_atomic(&paths.config_file, &bytes)?;

    Ok(ProvisionedTokens { tokens })
}
