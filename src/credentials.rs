//! Credential records and bearer-token verification.
//!
//! This module owns two responsibilities:
//! 1. Holding the role → digest mapping loaded from the provisioning record.
//! 2. Resolving a presented bearer token to the role it belongs to.
//!
//! Raw tokens are never stored. Only their SHA-256 digests are kept, and
//! every verification compares the presented digest against *all* stored
//! digests with a fixed-time comparison, so neither the position of the
//! first differing byte nor the position of the matching record is
//! observable through timing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::{self, DIGEST_LEN};
use crate::error::CustosError;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// A permission class a credential maps to. Roles are not hierarchical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The day-to-day client credential.
    Primary,
    /// The administrator's break-glass credential.
    Emergency,
    /// The provisioning credential, allowed to seed secrets.
    Setup,
}

impl Role {
    /// Every role, in provisioning order.
    pub const ALL: [Role; 3] = [Role::Primary, Role::Emergency, Role::Setup];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Emergency => "emergency",
            Self::Setup => "setup",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CustosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "emergency" => Ok(Self::Emergency),
            "setup" => Ok(Self::Setup),
            other => Err(CustosError::Config(format!("unknown role: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// The one-way digest of a bearer token.
///
/// - Not `Debug`-printable in full: only a short prefix is shown.
/// - Zeroised on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenDigest {
    bytes: [u8; DIGEST_LEN],
}

impl TokenDigest {
    /// Hash a raw token.
    pub fn of_token(token: &str) -> Self {
        Self {
            bytes: crypto::sha256(token.as_bytes()),
        }
    }

    /// Parse a lowercase or uppercase hex digest as stored in `config.json`.
    pub fn from_hex(hex_digest: &str) -> Result<Self, CustosError> {
        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(hex_digest.trim(), &mut bytes)
            .map_err(|_| CustosError::Config("malformed token digest".to_string()))?;
        Ok(Self { bytes })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for TokenDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenDigest({}…)", hex::encode(&self.bytes[..4]))
    }
}

impl Drop for TokenDigest {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

/// One role and the digest of the token that grants it.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub role: Role,
    pub digest: TokenDigest,
}

/// Resolves presented bearer tokens to roles.
///
/// Built once at startup from the provisioning record and immutable
/// afterwards.
#[derive(Debug, Clone)]
pub struct CredentialVerifier {
    records: Vec<CredentialRecord>,
}

impl CredentialVerifier {
    /// Build a verifier, rejecting duplicate roles or duplicate digests.
    pub fn new(records: Vec<CredentialRecord>) -> Result<Self, CustosError> {
        for (i, a) in records.iter().enumerate() {
            for b in &records[i + 1..] {
                if a.role == b.role {
                    return Err(CustosError::Config(format!("duplicate role: {}", a.role)));
                }
                if a.digest == b.digest {
                    return Err(CustosError::Config(
                        "two roles share the same token".to_string(),
                    ));
                }
            }
        }
        Ok(Self { records })
    }

    /// Convenience constructor from raw tokens. Used by provisioning and tests.
    pub fn from_tokens<'a>(
        tokens: impl IntoIterator<Item = (Role, &'a str)>,
    ) -> Result<Self, CustosError> {
        let records = tokens
            .into_iter()
            .map(|(role, token)| CredentialRecord {
                role,
                digest: TokenDigest::of_token(token),
            })
            .collect();
        Self::new(records)
    }

    /// Resolve `presented` to a role.
    ///
    /// Returns `None` for an empty token or when no record matches. The loop
    /// visits every record even after a match.
    pub fn verify(&self, presented: &str) -> Option<Role> {
        if presented.is_empty() {
            return None;
        }
        let candidate = TokenDigest::of_token(presented);

        let mut matched = None;
        for record in &self.records {
            if crypto::fixed_time_eq(record.digest.as_bytes(), candidate.as_bytes())
                && matched.is_none()
            {
                matched = Some(record.role);
            }
        }
        matched
    }

    /// Roles this verifier knows about.
    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.records.iter().map(|r| r.role)
    }
}
