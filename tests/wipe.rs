//! Emergency wipe: confirmation, irreversibility, and on-disk erasure.

use std::sync::Arc;

use custos::audit::Outcome;
use custos::{
    CredentialVerifier, Custos, CustosError, FileStateStore, MemoryStateStore, Role,
    SecretManager, SecretPayload, StateStore, WIPE_CONFIRMATION,
};
use tempfile::TempDir;

const PRIMARY: &str = "primary-token";
const EMERGENCY: &str = "emergency-token";

fn service(store: Arc<dyn StateStore>) -> Custos {
    let verifier =
        CredentialVerifier::from_tokens([(Role::Primary, PRIMARY), (Role::Emergency, EMERGENCY)])
            .unwrap();
    Custos::new(verifier, SecretManager::load(store).unwrap())
}

#[test]
fn test_wrong_or_missing_confirmation_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStateStore::open(dir.path()).unwrap());
    let svc = service(store.clone());
    svc.store_secret(Some(PRIMARY), "a", SecretPayload::new(b"1".to_vec()))
        .unwrap();
    svc.store_secret(Some(PRIMARY), "b", SecretPayload::new(b"2".to_vec()))
        .unwrap();

    for bad in [None, Some("yes"), Some("destroy_all_keys")] {
        assert!(matches!(
            svc.destroy_all(Some(EMERGENCY), bad),
            Err(CustosError::ConfirmationRequired)
        ));
    }

    assert_eq!(svc.retrieve_secret(Some(PRIMARY), "a").unwrap().as_bytes(), b"1");
    assert_eq!(svc.retrieve_secret(Some(PRIMARY), "b").unwrap().as_bytes(), b"2");
    assert_eq!(store.load_secrets().unwrap().len(), 2);
}

#[test]
fn test_wipe_is_irreversible_across_restart() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStateStore::open(dir.path()).unwrap());
    let svc = service(store.clone());
    svc.store_secret(Some(PRIMARY), "k1", SecretPayload::new(b"abc".to_vec()))
        .unwrap();

    let before = std::fs::read_to_string(store.secrets_file()).unwrap();
    assert!(before.contains(&hex::encode(b"abc")));

    assert_eq!(svc.destroy_all(Some(EMERGENCY), Some(WIPE_CONFIRMATION)).unwrap(), 1);
    assert!(matches!(
        svc.retrieve_secret(Some(PRIMARY), "k1"),
        Err(CustosError::NotFound(_))
    ));

    // The record is rewritten empty and carries none of the old content.
    let after = std::fs::read_to_string(store.secrets_file()).unwrap();
    assert!(!after.contains(&hex::encode(b"abc")));
    drop(svc);

    let restarted = service(Arc::new(FileStateStore::open(dir.path()).unwrap()));
    assert_eq!(restarted.health().data_count, 0);
    assert!(matches!(
        restarted.retrieve_secret(Some(PRIMARY), "k1"),
        Err(CustosError::NotFound(_))
    ));
}

#[test]
fn test_wipe_leaves_lock_flag_alone() {
    let dir = TempDir::new().unwrap();
    let svc = service(Arc::new(FileStateStore::open(dir.path()).unwrap()));
    svc.store_secret(Some(PRIMARY), "k", SecretPayload::new(b"v".to_vec()))
        .unwrap();
    svc.lock(Some(EMERGENCY)).unwrap();

    svc.destroy_all(Some(EMERGENCY), Some(WIPE_CONFIRMATION)).unwrap();
    assert!(svc.health().locked);

    svc.unlock(Some(EMERGENCY)).unwrap();
    // Stores still work after a wipe.
    svc.store_secret(Some(PRIMARY), "fresh", SecretPayload::new(b"new".to_vec()))
        .unwrap();
    assert_eq!(svc.retrieve_secret(Some(PRIMARY), "fresh").unwrap().as_bytes(), b"new");
}

#[test]
fn test_wipe_on_failing_medium_reports_and_keeps_secrets() {
    let store = Arc::new(MemoryStateStore::new());
    let svc = service(store.clone());
    svc.store_secret(Some(PRIMARY), "k", SecretPayload::new(b"v".to_vec()))
        .unwrap();

    store.set_fail_writes(true);
    assert!(matches!(
        svc.destroy_all(Some(EMERGENCY), Some(WIPE_CONFIRMATION)),
        Err(CustosError::Storage(_))
    ));
    assert_eq!(svc.retrieve_secret(Some(PRIMARY), "k").unwrap().as_bytes(), b"v");
    assert_eq!(store.load_secrets().unwrap().len(), 1);

    let outcomes: Vec<_> = svc.recent_access().iter().map(|r| r.outcome).collect();
    assert!(outcomes.contains(&Outcome::Failed));

    store.set_fail_writes(false);
    assert_eq!(svc.destroy_all(Some(EMERGENCY), Some(WIPE_CONFIRMATION)).unwrap(), 1);
    assert_eq!(svc.health().data_count, 0);
}
