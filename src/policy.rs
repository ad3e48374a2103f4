//! Access gate: static role allow-lists plus the lock check.
//!
//! Authorization is a two-step pipeline run by every handler before the
//! store is touched:
//!
//! ```text
//! authorize(role, op)  ->  check_lock(op, locked)  ->  operation
//! ```
//!
//! Both steps are pure functions. Neither logs nor mutates anything.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::credentials::Role;
use crate::error::CustosError;

/// Every authenticated operation the service exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    RetrieveSecret,
    StoreSecret,
    Lock,
    Unlock,
    WipeAll,
    ReadLockStatus,
}

impl Operation {
    /// The static allow-list for this operation.
    pub fn allowed_roles(&self) -> &'static [Role] {
        match self {
            Self::RetrieveSecret => &[Role::Primary],
            Self::StoreSecret => &[Role::Primary, Role::Setup],
            Self::Lock => &[Role::Primary, Role::Emergency],
            Self::Unlock => &[Role::Primary, Role::Emergency],
            Self::WipeAll => &[Role::Emergency],
            Self::ReadLockStatus => &[Role::Primary],
        }
    }

    /// Whether the lock flag gates this operation. Only reads of secret
    /// content are gated.
    pub fn is_lock_gated(&self) -> bool {
        matches!(self, Self::RetrieveSecret)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetrieveSecret => "retrieve-secret",
            Self::StoreSecret => "store-secret",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::WipeAll => "wipe-all",
            Self::ReadLockStatus => "read-lock-status",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allow `role` to perform `op` only if it appears in the allow-list.
///
/// A missing role (unauthenticated caller) is denied with the same error
/// as a role that is present but not permitted.
pub fn authorize(role: Option<Role>, op: Operation) -> Result<Role, CustosError> {
    match role {
        Some(role) if op.allowed_roles().contains(&role) => Ok(role),
        _ => Err(CustosError::Unauthorized),
    }
}

/// Deny lock-gated operations while `locked` is set, regardless of role.
pub fn check_lock(op: Operation, locked: bool) -> Result<(), CustosError> {
    if locked && op.is_lock_gated() {
        return Err(CustosError::Locked);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_OPS: [Operation; 6] = [
        Operation::RetrieveSecret,
        Operation::StoreSecret,
        Operation::Lock,
        Operation::Unlock,
        Operation::WipeAll,
        Operation::ReadLockStatus,
    ];

    #[test]
    fn allow_list_matrix() {
        use Role::*;
        let expected: [(Operation, [bool; 3]); 6] = [
            // (op, [primary, emergency, setup])
            (Operation::RetrieveSecret, [true, false, false]),
            (Operation::StoreSecret, [true, false, true]),
            (Operation::Lock, [true, true, false]),
            (Operation::Unlock, [true, true, false]),
            (Operation::WipeAll, [false, true, false]),
            (Operation::ReadLockStatus, [true, false, false]),
        ];

        for (op, allowed) in expected {
            for (role, ok) in [Primary, Emergency, Setup].into_iter().zip(allowed) {
                assert_eq!(
                    authorize(Some(role), op).is_ok(),
                    ok,
                    "{role} on {op}"
                );
            }
        }
    }

    #[test]
    fn missing_role_is_always_denied() {
        for op in ALL_OPS {
            assert!(matches!(authorize(None, op), Err(CustosError::Unauthorized)));
        }
    }

    #[test]
    fn lock_only_gates_retrieval() {
        for op in ALL_OPS {
            assert!(check_lock(op, false).is_ok());
            let locked = check_lock(op, true);
            if op == Operation::RetrieveSecret {
                assert!(matches!(locked, Err(CustosError::Locked)));
            } else {
                assert!(locked.is_ok(), "{op} must not be lock gated");
            }
        }
    }
}
