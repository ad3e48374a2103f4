//! Persistent state: the secrets record and the lock-state record.
//!
//! The [`StateStore`] trait is the seam between the lifecycle manager and the
//! storage medium. [`FileStateStore`] is the production implementation;
//! [`MemoryStateStore`] backs tests and embedders that do not want disk I/O.
//!
//! ## On-disk layout
//!
//! ```text
//! <data_dir>/tokens.json   {"<id>": "<hex payload>", ...}      0600
//! <data_dir>/state.json    {"locked": bool, "last_updated": ...} 0600
//! ```
//!
//! Every save writes a sibling temporary file, syncs it, and renames it over
//! the target, so a reader of the medium sees either the old image or the new
//! one and never a torn file.
//!
//! ## Secure erase
//!
//! [`StateStore::shred_secrets`] overwrites the secrets record in place with
//! random bytes before unlinking it. This is best effort: copy-on-write and
//! log-structured filesystems, SSD wear levelling, and earlier renamed-over
//! generations of the file may all retain old blocks.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto;
use crate::error::CustosError;

/// Owner read/write only.
pub const FILE_MODE: u32 = 0o600;

/// Minimum number of random bytes written over the secrets record on erase.
pub const SHRED_MIN_BYTES: usize = 4096;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// An opaque secret blob. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretPayload(Vec<u8>);

impl SecretPayload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretPayload([REDACTED; {} bytes])", self.0.len())
    }
}

impl Serialize for SecretPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = Zeroizing::new(hex::encode(&self.0));
        serializer.serialize_str(&encoded)
    }
}

impl<'de> Deserialize<'de> for SecretPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = Zeroizing::new(String::deserialize(deserializer)?);
        hex::decode(encoded.as_str())
            .map(SecretPayload)
            .map_err(serde::de::Error::custom)
    }
}

/// Secrets keyed by caller-supplied identifier.
pub type SecretMap = BTreeMap<String, SecretPayload>;

/// The durable lock flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    pub locked: bool,
    pub last_updated: DateTime<Utc>,
}

impl LockState {
    pub fn new(locked: bool) -> Self {
        Self {
            locked,
            last_updated: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Durable storage for the secrets record and the lock-state record.
///
/// Every `save_*` must be durable and atomic when it returns `Ok`. A failing
/// call returns [`CustosError::Storage`] promptly instead of blocking.
pub trait StateStore: Send + Sync {
    /// Load all secrets. A store that has never been written yields an empty map.
    fn load_secrets(&self) -> Result<SecretMap, CustosError>;

    /// Replace the secrets record with `secrets`.
    fn save_secrets(&self, secrets: &SecretMap) -> Result<(), CustosError>;

    /// Load the lock state, or `None` on first run.
    fn load_lock(&self) -> Result<Option<LockState>, CustosError>;

    /// Replace the lock-state record.
    fn save_lock(&self, state: &LockState) -> Result<(), CustosError>;

    /// Overwrite the secrets record with random bytes, then remove it.
    fn shred_secrets(&self) -> Result<(), CustosError>;
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// A [`StateStore`] backed by two owner-only JSON files.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    secrets_file: PathBuf,
    state_file: PathBuf,
}

impl FileStateStore {
    /// Open a store rooted at `data_dir`, creating the directory (0700) if needed.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, CustosError> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir).map_err(|e| CustosError::storage("create data dir", e))?;
        fs::set_permissions(data_dir, Permissions::from_mode(0o700))
            .map_err(|e| CustosError::storage("restrict data dir", e))?;

        Ok(Self {
            secrets_file: data_dir.join(SECRETS_FILE_NAME),
            state_file: data_dir.join(STATE_FILE_NAME),
        })
    }

    pub fn secrets_file(&self) -> &Path {
        &self.secrets_file
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }
}

pub(crate) const SECRETS_FILE_NAME: &str = "tokens.json";
pub(crate) const STATE_FILE_NAME: &str = "state.json";

/// Read `path`, returning `None` when it does not exist.
fn read_optional(path: &Path) -> Result<Option<Zeroizing<Vec<u8>>>, CustosError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(Zeroizing::new(bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CustosError::storage("read", e)),
    }
}

/// Atomically replace `path` with `contents`, owner-only.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CustosError> {
    let tmp = path.with_extension("json.tmp");

    let result = (|| -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(FILE_MODE)
            .open(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        fs::set_permissions(path, Permissions::from_mode(FILE_MODE))?;
        if let Some(parent) = path.parent() {
            // Persist the rename itself.
            fs::File::open(parent)?.sync_all()?;
        }
        Ok(())
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(CustosError::storage("write", e));
    }
    Ok(())
}

impl StateStore for FileStateStore {
    fn load_secrets(&self) -> Result<SecretMap, CustosError> {
        match read_optional(&self.secrets_file)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CustosError::storage("parse secrets record", e)),
            None => Ok(SecretMap::new()),
        }
    }

    fn save_secrets(&self, secrets: &SecretMap) -> Result<(), CustosError> {
        let bytes = Zeroizing::new(
            serde_json::to_vec_pretty(secrets)
                .map_err(|e| CustosError::storage("encode secrets record", e))?,
        );
        write_atomic(&self.secrets_file, &bytes)
    }

    fn load_lock(&self) -> Result<Option<LockState>, CustosError> {
        match read_optional(&self.state_file)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| CustosError::storage("parse lock state", e)),
            None => Ok(None),
        }
    }

    fn save_lock(&self, state: &LockState) -> Result<(), CustosError> {
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| CustosError::storage("encode lock state", e))?;
        write_atomic(&self.state_file, &bytes)
    }

    fn shred_secrets(&self) -> Result<(), CustosError> {
        let len = match fs::metadata(&self.secrets_file) {
            Ok(meta) => (meta.len() as usize).max(SHRED_MIN_BYTES),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CustosError::storage("stat secrets record", e)),
        };
        let noise = crypto::random_bytes(len)?;

        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.secrets_file)
            .map_err(|e| CustosError::storage("open secrets record", e))?;
        file.write_all(&noise)
            .and_then(|_| file.sync_all())
            .map_err(|e| CustosError::storage("overwrite secrets record", e))?;
        drop(file);

        fs::remove_file(&self.secrets_file)
            .map_err(|e| CustosError::storage("remove secrets record", e))
    }
}

// ---------------------------------------------------------------------------
// Memory store
// ---------------------------------------------------------------------------

/// An in-process [`StateStore`]. Durability ends with the process.
///
/// Writes can be made to fail on demand to exercise storage-failure paths.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    secrets: Mutex<Option<SecretMap>>,
    lock: Mutex<Option<LockState>>,
    fail_writes: AtomicBool,
    shreds: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// How many times the secrets record has been shredded.
    pub fn shred_count(&self) -> usize {
        self.shreds.load(Ordering::SeqCst)
    }

    /// Whether a secrets record currently exists.
    pub fn has_secrets_record(&self) -> bool {
        self.secrets.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    fn check_writable(&self) -> Result<(), CustosError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CustosError::Storage("medium unavailable".to_string()));
        }
        Ok(())
    }
}

fn poisoned<T>(_: T) -> CustosError {
    CustosError::Storage("store mutex poisoned".to_string())
}

impl StateStore for MemoryStateStore {
    fn load_secrets(&self) -> Result<SecretMap, CustosError> {
        let guard = self.secrets.lock().map_err(poisoned)?;
        Ok(guard.clone().unwrap_or_default())
    }

    fn save_secrets(&self, secrets: &SecretMap) -> Result<(), CustosError> {
        self.check_writable()?;
        *self.secrets.lock().map_err(poisoned)? = Some(secrets.clone());
        Ok(())
    }

    fn load_lock(&self) -> Result<Option<LockState>, CustosError> {
        Ok(*self.lock.lock().map_err(poisoned)?)
    }

    fn save_lock(&self, state: &LockState) -> Result<(), CustosError> {
        self.check_writable()?;
        *self.lock.lock().map_err(poisoned)? = Some(*state);
        Ok(())
    }

    fn shred_secrets(&self) -> Result<(), CustosError> {
        self.check_writable()?;
        let mut guard = self.secrets.lock().map_err(poisoned)?;
        if let Some(mut old) = guard.take() {
            for payload in old.values_mut() {
                payload.zeroize();
            }
            self.shreds.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
