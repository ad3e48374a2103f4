//! # custos
//!
//! A small network secret store with role-scoped bearer tokens, a durable
//! lock gate, and an irreversible emergency wipe.
//!
//! A request flows through four layers:
//!
//! ```text
//! credentials::CredentialVerifier   token  -> role
//! policy::{authorize, check_lock}   (role, operation, lock flag) -> allow / deny
//! secrets::SecretManager            store / retrieve / set_lock / destroy_all
//! store::StateStore                 atomic, owner-only persistence + secure erase
//! ```
//!
//! [`service::Custos`] ties them together behind request/response
//! operations and [`http`] exposes those over HTTP.
//!
//! ## Public API
//!
//! Everything needed to embed the service is re-exported here. `crypto` is
//! crate-private: raw digests and random material never leave the crate.

pub(crate) mod crypto;
pub mod audit;
pub mod config;
pub mod credentials;
pub mod error;
pub mod http;
pub mod policy;
pub mod secrets;
pub mod service;
pub mod store;

pub use config::{provision, CustosPaths, ProvisionedTokens, ProvisioningConfig};
pub use credentials::{CredentialVerifier, Role};
pub use error::CustosError;
pub use policy::Operation;
pub use secrets::{SecretManager, WIPE_CONFIRMATION};
pub use service::Custos;
pub use store::{FileStateStore, LockState, MemoryStateStore, SecretPayload, StateStore};
