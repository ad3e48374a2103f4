//! Secret lifecycle: store, retrieve, lock and destroy.
//!
//! [`SecretManager`] is the single owner of the in-memory snapshot and the
//! only writer of the [`StateStore`]. Mutations follow one pattern:
//!
//! 1. take the writer mutex (serializes store, set_lock and destroy_all,
//!    including their durable writes)
//! 2. build the next snapshot from the current one
//! 3. persist it
//! 4. swap it in under the snapshot write lock
//!
//! Readers clone the current `Arc<Snapshot>` and never observe a
//! half-applied mutation. A failed write in step 3 leaves the in-memory
//! snapshot untouched.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{error, info, warn};

use crate::error::CustosError;
use crate::policy::{self, Operation};
use crate::store::{LockState, SecretMap, SecretPayload, StateStore};

/// The exact value a caller must supply to authorize [`SecretManager::destroy_all`].
pub const WIPE_CONFIRMATION: &str = "DESTROY_ALL_KEYS";

/// A consistent view of the service state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    secrets: Arc<SecretMap>,
    lock: LockState,
}

impl Snapshot {
    pub fn is_locked(&self) -> bool {
        self.lock.locked
    }

    pub fn lock_state(&self) -> LockState {
        self.lock
    }

    pub fn secret_count(&self) -> usize {
        self.secrets.len()
    }
}

/// Owns the secrets and the lock flag.
pub struct SecretManager {
    store: Arc<dyn StateStore>,
    state: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
}

impl std::fmt::Debug for SecretManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("SecretManager")
            .field("secrets", &snap.secret_count())
            .field("locked", &snap.is_locked())
            .finish()
    }
}

impl SecretManager {
    /// Load state from `store`, defaulting to empty and unlocked on first run.
    pub fn load(store: Arc<dyn StateStore>) -> Result<Self, CustosError> {
        let secrets = store.load_secrets()?;
        let lock = store.load_lock()?.unwrap_or_else(|| LockState::new(false));

        info!(secrets = secrets.len(), locked = lock.locked, "state loaded");

        Ok(Self {
            store,
            state: RwLock::new(Arc::new(Snapshot {
                secrets: Arc::new(secrets),
                lock,
            })),
            writer: Mutex::new(()),
        })
    }

    /// The current snapshot. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        // The guarded value is only ever replaced whole, so a poisoned lock
        // still holds a consistent snapshot.
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn lock_state(&self) -> LockState {
        self.snapshot().lock
    }

    pub fn is_locked(&self) -> bool {
        self.snapshot().lock.locked
    }

    pub fn secret_count(&self) -> usize {
        self.snapshot().secret_count()
    }

    fn begin_write(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, next: Snapshot) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }

    /// Upsert `payload` under `id` and persist the full secrets record.
    pub fn store(&self, id: &str, payload: SecretPayload) -> Result<(), CustosError> {
        if id.is_empty() {
            return Err(CustosError::InvalidRequest("empty secret id".to_string()));
        }

        let _w = self.begin_write();
        let current = self.snapshot();

        let mut secrets = SecretMap::clone(&current.secrets);
        secrets.insert(id.to_string(), payload);
        self.store.save_secrets(&secrets)?;

        self.publish(Snapshot {
            secrets: Arc::new(secrets),
            lock: current.lock,
        });
        Ok(())
    }

    /// Return the payload stored under `id`.
    ///
    /// The lock check and the lookup read the same snapshot, so a retrieval
    /// racing a lock either completes before it or is refused.
    pub fn retrieve(&self, id: &str) -> Result<SecretPayload, CustosError> {
        let snap = self.snapshot();
        policy::check_lock(Operation::RetrieveSecret, snap.lock.locked)?;

        snap.secrets
            .get(id)
            .cloned()
            .ok_or_else(|| CustosError::NotFound(id.to_string()))
    }

    /// Set the lock flag. Setting it to its current value succeeds without
    /// rewriting the record.
    pub fn set_lock(&self, locked: bool) -> Result<LockState, CustosError> {
        let _w = self.begin_write();
        let current = self.snapshot();
        if current.lock.locked == locked {
            return Ok(current.lock);
        }

        let lock = LockState::new(locked);
        self.store.save_lock(&lock)?;

        self.publish(Snapshot {
            secrets: Arc::clone(&current.secrets),
            lock,
        });
        if locked {
            warn!("lock flag set");
        } else {
            info!("lock flag cleared");
        }
        Ok(lock)
    }

    /// Irreversibly destroy every stored secret.
    ///
    /// `confirmation` must equal [`WIPE_CONFIRMATION`] exactly; otherwise
    /// nothing is touched. The secrets record is overwritten and removed,
    /// an empty record is written, and only then is the empty snapshot
    /// published. The lock flag is left as it was.
    ///
    /// If the medium fails part way the call returns `Storage` and the
    /// in-memory snapshot is unchanged; retry once the medium recovers.
    pub fn destroy_all(&self, confirmation: Option<&str>) -> Result<usize, CustosError> {
        if confirmation != Some(WIPE_CONFIRMATION) {
            return Err(CustosError::ConfirmationRequired);
        }

        let _w = self.begin_write();
        let current = self.snapshot();
        let destroyed = current.secrets.len();

        if let Err(e) = self
            .store
            .shred_secrets()
            .and_then(|_| self.store.save_secrets(&SecretMap::new()))
        {
            error!(error = %e, "wipe failed, storage not erased");
            return Err(e);
        }

        self.publish(Snapshot {
            secrets: Arc::new(SecretMap::new()),
            lock: current.lock,
        });

        error!(destroyed, "all secrets destroyed");
        Ok(destroyed)
    }
}
