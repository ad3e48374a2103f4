//! The request/response façade.
//!
//! Every authenticated entry point runs the same pipeline before touching
//! the lifecycle manager:
//!
//! ```text
//! credential -> verify -> authorize(role, op) -> [check_lock] -> SecretManager
//! ```
//!
//! and appends one [`AccessRecord`] describing how it ended.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::audit::{AccessLog, AccessRecord, AccessSink, FileAccessSink, Outcome};
use crate::config::{CustosPaths, ProvisioningConfig};
use crate::credentials::{CredentialVerifier, Role};
use crate::error::CustosError;
use crate::policy::{self, Operation};
use crate::secrets::SecretManager;
use crate::store::{LockState, SecretPayload, StateStore};

/// Unauthenticated liveness and lock status. Carries no secret data.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub locked: bool,
    pub time: DateTime<Utc>,
    pub data_count: usize,
}

/// What a client device should do with its mounted volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceAction {
    Unmount,
    KeepMounted,
}

/// Lock status as reported to a polling device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub locked: bool,
    pub action: DeviceAction,
}

/// The service: credential verification, authorization, the secret
/// lifecycle and the access log, owned together.
pub struct Custos {
    verifier: CredentialVerifier,
    secrets: SecretManager,
    access_log: Mutex<AccessLog>,
}

impl std::fmt::Debug for Custos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Custos")
            .field("roles", &self.verifier.roles().collect::<Vec<_>>())
            .field("secrets", &self.secrets)
            .finish()
    }
}

impl Custos {
    pub fn new(verifier: CredentialVerifier, secrets: SecretManager) -> Self {
        Self {
            verifier,
            secrets,
            access_log: Mutex::new(AccessLog::new()),
        }
    }

    /// Load a provisioned installation: `config.json`, the state store under
    /// `data/`, and an access log sink at `data/access.log`.
    pub fn open(paths: &CustosPaths) -> Result<Self, CustosError> {
        let verifier = ProvisioningConfig::load(&paths.config_file)?.verifier()?;
        let store: Arc<dyn StateStore> = Arc::new(paths.open_store()?);
        let service = Self::new(verifier, SecretManager::load(store)?);

        let sink = FileAccessSink::new(&paths.access_log)
            .map_err(|e| CustosError::storage("open access log", e))?;
        service.add_access_sink(Box::new(sink));
        Ok(service)
    }

    pub fn add_access_sink(&self, sink: Box<dyn AccessSink>) {
        self.log().add_forward_sink(sink);
    }

    /// Recent access records, oldest first.
    pub fn recent_access(&self) -> Vec<AccessRecord> {
        self.log().iter().cloned().collect()
    }

    pub fn secrets(&self) -> &SecretManager {
        &self.secrets
    }

    fn log(&self) -> std::sync::MutexGuard<'_, AccessLog> {
        self.access_log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record<T>(
        &self,
        op: Operation,
        role: Option<Role>,
        subject: Option<&str>,
        result: &Result<T, CustosError>,
    ) {
        let outcome = match result {
            Ok(_) => Outcome::Allowed,
            Err(CustosError::Unauthorized) => Outcome::Unauthorized,
            Err(CustosError::Locked) => Outcome::Locked,
            Err(CustosError::NotFound(_)) => Outcome::NotFound,
            Err(CustosError::ConfirmationRequired) => Outcome::ConfirmationRequired,
            Err(_) => Outcome::Failed,
        };
        self.log().append(AccessRecord::new(op, role, subject, outcome));
    }

    /// Resolve and authorize a credential for `op`. Denials are logged with
    /// no detail beyond the operation.
    pub(crate) fn authenticate(
        &self,
        credential: Option<&str>,
        op: Operation,
        subject: Option<&str>,
    ) -> Result<Role, CustosError> {
        let role = credential.and_then(|token| self.verifier.verify(token));
        let result = policy::authorize(role, op);
        if result.is_err() {
            warn!(operation = %op, "unauthorized request");
            self.record(op, role, subject, &result);
        }
        result
    }

    /// Unauthenticated status.
    pub fn health(&self) -> Health {
        let snap = self.secrets.snapshot();
        Health {
            status: "healthy",
            locked: snap.is_locked(),
            time: Utc::now(),
            data_count: snap.secret_count(),
        }
    }

    pub fn retrieve_secret(
        &self,
        credential: Option<&str>,
        id: &str,
    ) -> Result<SecretPayload, CustosError> {
        let op = Operation::RetrieveSecret;
        let role = self.authenticate(credential, op, Some(id))?;

        let result = self.secrets.retrieve(id);
        match &result {
            Ok(_) => info!(id, %role, "secret retrieved"),
            Err(CustosError::Locked) => warn!(id, %role, "retrieval refused while locked"),
            Err(_) => {}
        }
        self.record(op, Some(role), Some(id), &result);
        result
    }

    pub fn store_secret(
        &self,
        credential: Option<&str>,
        id: &str,
        payload: SecretPayload,
    ) -> Result<(), CustosError> {
        self.store_request(credential, id, Some(payload))
    }

    /// A store whose request may have carried no payload. An authorized
    /// caller with nothing to store gets `InvalidRequest`, and is logged.
    pub(crate) fn store_request(
        &self,
        credential: Option<&str>,
        id: &str,
        payload: Option<SecretPayload>,
    ) -> Result<(), CustosError> {
        let op = Operation::StoreSecret;
        let role = self.authenticate(credential, op, Some(id))?;

        let result = match payload {
            Some(payload) => self.secrets.store(id, payload),
            None => Err(CustosError::InvalidRequest("No data provided".to_string())),
        };
        if result.is_ok() {
            info!(id, %role, "secret stored");
        }
        self.record(op, Some(role), Some(id), &result);
        result
    }

    pub fn lock(&self, credential: Option<&str>) -> Result<LockState, CustosError> {
        self.set_lock(credential, Operation::Lock, true)
    }

    pub fn unlock(&self, credential: Option<&str>) -> Result<LockState, CustosError> {
        self.set_lock(credential, Operation::Unlock, false)
    }

    fn set_lock(
        &self,
        credential: Option<&str>,
        op: Operation,
        locked: bool,
    ) -> Result<LockState, CustosError> {
        let role = self.authenticate(credential, op, None)?;

        let result = self.secrets.set_lock(locked);
        if result.is_ok() {
            if locked {
                warn!(%role, "server locked");
            } else {
                info!(%role, "server unlocked");
            }
        }
        self.record(op, Some(role), None, &result);
        result
    }

    /// Lock status for a polling client device.
    pub fn device_status(
        &self,
        credential: Option<&str>,
        device_id: &str,
    ) -> Result<DeviceStatus, CustosError> {
        let op = Operation::ReadLockStatus;
        let role = self.authenticate(credential, op, Some(device_id))?;

        let locked = self.secrets.is_locked();
        let status = DeviceStatus {
            device_id: device_id.to_string(),
            locked,
            action: if locked {
                DeviceAction::Unmount
            } else {
                DeviceAction::KeepMounted
            },
        };
        let result = Ok(status);
        self.record(op, Some(role), Some(device_id), &result);
        result
    }

    /// Destroy every secret. Returns how many were destroyed.
    pub fn destroy_all(
        &self,
        credential: Option<&str>,
        confirmation: Option<&str>,
    ) -> Result<usize, CustosError> {
        let op = Operation::WipeAll;
        let role = self.authenticate(credential, op, None)?;

        if confirmation.is_some_and(|c| c == crate::secrets::WIPE_CONFIRMATION) {
            tracing::error!(%role, "emergency wipe initiated");
        }
        let result = self.secrets.destroy_all(confirmation);
        self.record(op, Some(role), None, &result);
        result
    }
}
