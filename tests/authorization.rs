//! Credential verification and role allow-lists through the public façade.

use std::sync::Arc;

use custos::policy::{authorize, check_lock};
use custos::{
    CredentialVerifier, Custos, CustosError, MemoryStateStore, Operation, Role, SecretManager,
    SecretPayload, WIPE_CONFIRMATION,
};

const PRIMARY: &str = "3f1c-primary-token";
const EMERGENCY: &str = "9a2b-emergency-token";
const SETUP: &str = "77de-setup-token";

fn service() -> Custos {
    let verifier = CredentialVerifier::from_tokens([
        (Role::Primary, PRIMARY),
        (Role::Emergency, EMERGENCY),
        (Role::Setup, SETUP),
    ])
    .unwrap();
    Custos::new(
        verifier,
        SecretManager::load(Arc::new(MemoryStateStore::new())).unwrap(),
    )
}

#[test]
fn test_missing_and_unregistered_credentials_look_the_same() {
    let svc = service();
    svc.store_secret(Some(PRIMARY), "test-key", SecretPayload::new(b"v".to_vec()))
        .unwrap();

    let missing = svc.retrieve_secret(None, "test-key").unwrap_err();
    let empty = svc.retrieve_secret(Some(""), "test-key").unwrap_err();
    let invalid = svc.retrieve_secret(Some("invalid-token"), "test-key").unwrap_err();
    let wrong_role = svc.retrieve_secret(Some(EMERGENCY), "test-key").unwrap_err();

    for err in [&missing, &empty, &invalid, &wrong_role] {
        assert!(matches!(err, CustosError::Unauthorized));
        assert_eq!(err.to_string(), "unauthorized");
    }
}

#[test]
fn test_primary_cannot_wipe() {
    let svc = service();
    svc.store_secret(Some(PRIMARY), "k", SecretPayload::new(b"v".to_vec()))
        .unwrap();

    let result = svc.destroy_all(Some(PRIMARY), Some(WIPE_CONFIRMATION));
    assert!(matches!(result, Err(CustosError::Unauthorized)));
    assert_eq!(svc.retrieve_secret(Some(PRIMARY), "k").unwrap().as_bytes(), b"v");
}

#[test]
fn test_emergency_cannot_store_or_read() {
    let svc = service();
    let result = svc.store_secret(Some(EMERGENCY), "k", SecretPayload::new(b"v".to_vec()));
    assert!(matches!(result, Err(CustosError::Unauthorized)));
    assert_eq!(svc.health().data_count, 0);

    assert!(matches!(
        svc.retrieve_secret(Some(EMERGENCY), "k"),
        Err(CustosError::Unauthorized)
    ));
}

#[test]
fn test_setup_can_seed_but_not_read_or_lock() {
    let svc = service();
    svc.store_secret(Some(SETUP), "seed", SecretPayload::new(b"initial".to_vec()))
        .unwrap();

    assert!(matches!(svc.retrieve_secret(Some(SETUP), "seed"), Err(CustosError::Unauthorized)));
    assert!(matches!(svc.lock(Some(SETUP)), Err(CustosError::Unauthorized)));
    assert!(matches!(svc.unlock(Some(SETUP)), Err(CustosError::Unauthorized)));
    assert_eq!(
        svc.retrieve_secret(Some(PRIMARY), "seed").unwrap().as_bytes(),
        b"initial"
    );
}

#[test]
fn test_authorize_is_a_pure_function_of_the_allow_list() {
    for _ in 0..3 {
        assert!(authorize(Some(Role::Primary), Operation::WipeAll).is_err());
        assert!(authorize(Some(Role::Emergency), Operation::StoreSecret).is_err());
        assert!(authorize(Some(Role::Emergency), Operation::WipeAll).is_ok());
    }
    // The lock never blocks anything but retrieval.
    assert!(check_lock(Operation::StoreSecret, true).is_ok());
    assert!(check_lock(Operation::Unlock, true).is_ok());
    assert!(matches!(
        check_lock(Operation::RetrieveSecret, true),
        Err(CustosError::Locked)
    ));
}
