//! ConsentRegistry (spec §4.2) — the cumulative audit ledger behind every
//! consented pull. `PullExecutor` records per-call Authorization pulls
//! here; `Rebalancer` records cross-domain FlowIntent pulls into the same
//! ledger keyed by the intent's hash, so both planes share one
//! owner/cumulative/revocation audit trail.

use std::collections::HashSet;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use flowkernel_core::{Amount, AuthHash, Id, KernelError, KernelResult, Timestamp};
use flowkernel_storage::{Database, Store};

/// Per-authorization audit record.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
struct ConsentEntry {
    owner: Option<Id>,
    pulled_total: Amount,
    revoked: bool,
    cap: Option<Amount>,
}

pub struct ConsentRegistry {
    entries: Store<AuthHash, ConsentEntry>,
    controller: RwLock<Id>,
    trusted_executors: RwLock<HashSet<Id>>,
}

impl ConsentRegistry {
    pub fn open(db: &Database, controller: Id) -> KernelResult<Self> {
        Ok(Self {
            entries: db.open_tree("consent_entries")?,
            controller: RwLock::new(controller),
            trusted_executors: RwLock::new(HashSet::new()),
        })
    }

    pub fn new_in_memory(controller: Id) -> Self {
        let db = Database::in_memory().expect("in-memory sled open is infallible");
        Self::open(&db, controller).expect("opening a tree on a fresh db is infallible")
    }

    fn require_controller(&self, caller: Id) -> KernelResult<()> {
        if caller == *self.controller.read().expect("controller lock poisoned") {
            Ok(())
        } else {
            Err(KernelError::NotController)
        }
    }

    // ── Reads ────────────────────────────────────────────────────────────

    pub fn is_revoked(&self, auth_hash: AuthHash) -> KernelResult<bool> {
        Ok(self.entries.get(&auth_hash)?.map(|e| e.revoked).unwrap_or(false))
    }

    pub fn pulled_total(&self, auth_hash: AuthHash) -> KernelResult<Amount> {
        Ok(self
            .entries
            .get(&auth_hash)?
            .map(|e| e.pulled_total)
            .unwrap_or(Amount::ZERO))
    }

    pub fn owner_of(&self, auth_hash: AuthHash) -> KernelResult<Option<Id>> {
        Ok(self.entries.get(&auth_hash)?.and_then(|e| e.owner))
    }

    // ── Trust management (controller-only) ──────────────────────────────

    pub fn set_trusted_executor(&self, caller: Id, executor: Id, trusted: bool) -> KernelResult<()> {
        self.require_controller(caller)?;
        let mut g = self.trusted_executors.write().expect("executors lock poisoned");
        if trusted {
            g.insert(executor);
        } else {
            g.remove(&executor);
        }
        Ok(())
    }

    pub fn is_trusted_executor(&self, executor: Id) -> bool {
        self.trusted_executors
            .read()
            .expect("executors lock poisoned")
            .contains(&executor)
    }

    pub fn rotate_controller(&self, caller: Id, new_controller: Id) -> KernelResult<()> {
        self.require_controller(caller)?;
        *self.controller.write().expect("controller lock poisoned") = new_controller;
        Ok(())
    }

    pub fn controller(&self) -> Id {
        *self.controller.read().expect("controller lock poisoned")
    }

    // ── Mutations ─────────────────────────────────────────────────────────

    /// Restricted to trusted executors (spec §4.2). Binds `owner` on first
    /// call; overflow on the cumulative total is a fatal protocol error,
    /// never a silent saturation.
    pub fn record_pull(
        &self,
        caller: Id,
        auth_hash: AuthHash,
        token: Id,
        grantor: Id,
        grantee: Id,
        amount: Amount,
    ) -> KernelResult<Amount> {
        if !self.is_trusted_executor(caller) {
            return Err(KernelError::NotTrustedExecutor);
        }

        let mut entry = self.entries.get(&auth_hash)?.unwrap_or_default();
        if entry.owner.is_none() {
            entry.owner = Some(grantor);
        }

        let (cumulative, overflowed) = entry.pulled_total.overflowing_add(amount);
        if overflowed {
            return Err(KernelError::ArithmeticOverflow);
        }
        entry.pulled_total = cumulative;
        self.entries.put(&auth_hash, &entry)?;

        let event = flowkernel_core::events::PullExecuted {
            auth_hash,
            token,
            grantor,
            grantee,
            amount,
            cumulative,
        };
        info!(?event, "pull recorded");

        Ok(cumulative)
    }

    /// Fails `UnknownAuthorization` if no owner is bound yet, `NotGrantor`
    /// if `caller` is not that owner.
    pub fn revoke(&self, caller: Id, auth_hash: AuthHash, now: Timestamp) -> KernelResult<()> {
        let mut entry = self
            .entries
            .get(&auth_hash)?
            .ok_or(KernelError::UnknownAuthorization(auth_hash))?;
        let owner = entry.owner.ok_or(KernelError::UnknownAuthorization(auth_hash))?;
        if caller != owner {
            return Err(KernelError::NotGrantor);
        }
        entry.revoked = true;
        self.entries.put(&auth_hash, &entry)?;
        let event = flowkernel_core::events::AuthorizationRevoked {
            auth_hash,
            grantor: owner,
            ts: now,
        };
        warn!(?event, "authorization revoked");
        Ok(())
    }

    pub fn set_cap(&self, caller: Id, auth_hash: AuthHash, new_cap: Amount) -> KernelResult<Amount> {
        let mut entry = self
            .entries
            .get(&auth_hash)?
            .ok_or(KernelError::UnknownAuthorization(auth_hash))?;
        let owner = entry.owner.ok_or(KernelError::UnknownAuthorization(auth_hash))?;
        if caller != owner {
            return Err(KernelError::NotGrantor);
        }
        let old_cap = entry.cap.unwrap_or(Amount::ZERO);
        entry.cap = Some(new_cap);
        self.entries.put(&auth_hash, &entry)?;
        let event = flowkernel_core::events::AuthorizationBudgetUpdated {
            auth_hash,
            old_cap,
            new_cap,
        };
        info!(?event, "authorization budget updated");
        Ok(old_cap)
    }

    /// Advisory, unauthenticated. MUST NOT be treated as evidence of
    /// consent by any caller (spec §4.2/§9).
    pub fn observe(&self, auth_hash: AuthHash, grantor: Id, grantee: Id, token: Id) {
        let event = flowkernel_core::events::AuthorizationObserved {
            auth_hash,
            grantor,
            grantee,
            token,
        };
        info!(?event, "authorization observed (unauthenticated)");
    }

    /// Record a cross-domain intent pull under the same audit ledger,
    /// keyed by the intent's hash reinterpreted as an `AuthHash` (both are
    /// plain 32-byte hashes; see the module doc).
    pub fn record_intent_pull(
        &self,
        caller: Id,
        intent_key: [u8; 32],
        token: Id,
        grantor: Id,
        grantee: Id,
        amount: Amount,
    ) -> KernelResult<Amount> {
        let key = AuthHash::from_bytes(intent_key);
        self.record_pull(caller, key, token, grantor, grantee, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> Id {
        Id::from_bytes([b; 32])
    }

    fn auth(b: u8) -> AuthHash {
        AuthHash::from_bytes([b; 32])
    }

    #[test]
    fn record_pull_requires_trusted_executor() {
        let registry = ConsentRegistry::new_in_memory(id(1));
        let result = registry.record_pull(id(9), auth(1), id(2), id(3), id(4), Amount::from(10u64));
        assert!(matches!(result, Err(KernelError::NotTrustedExecutor)));
    }

    #[test]
    fn record_pull_binds_owner_and_accumulates() {
        let registry = ConsentRegistry::new_in_memory(id(1));
        registry.set_trusted_executor(id(1), id(9), true).unwrap();

        let grantor = id(3);
        let cumulative = registry
            .record_pull(id(9), auth(1), id(2), grantor, id(4), Amount::from(60u64))
            .unwrap();
        assert_eq!(cumulative, Amount::from(60u64));
        assert_eq!(registry.owner_of(auth(1)).unwrap(), Some(grantor));

        let cumulative = registry
            .record_pull(id(9), auth(1), id(2), grantor, id(4), Amount::from(40u64))
            .unwrap();
        assert_eq!(cumulative, Amount::from(100u64));
        assert_eq!(registry.pulled_total(auth(1)).unwrap(), Amount::from(100u64));
    }

    #[test]
    fn only_owner_can_revoke() {
        let registry = ConsentRegistry::new_in_memory(id(1));
        registry.set_trusted_executor(id(1), id(9), true).unwrap();
        let grantor = id(3);
        registry
            .record_pull(id(9), auth(1), id(2), grantor, id(4), Amount::from(1u64))
            .unwrap();

        let result = registry.revoke(id(99), auth(1), 1_000);
        assert!(matches!(result, Err(KernelError::NotGrantor)));

        registry.revoke(grantor, auth(1), 1_000).unwrap();
        assert!(registry.is_revoked(auth(1)).unwrap());
    }

    #[test]
    fn revoke_unknown_authorization_fails() {
        let registry = ConsentRegistry::new_in_memory(id(1));
        let result = registry.revoke(id(3), auth(5), 1_000);
        assert!(matches!(result, Err(KernelError::UnknownAuthorization(_))));
    }

    #[test]
    fn set_cap_reports_old_and_new() {
        let registry = ConsentRegistry::new_in_memory(id(1));
        registry.set_trusted_executor(id(1), id(9), true).unwrap();
        let grantor = id(3);
        registry
            .record_pull(id(9), auth(1), id(2), grantor, id(4), Amount::from(1u64))
            .unwrap();

        let old_cap = registry.set_cap(grantor, auth(1), Amount::from(500u64)).unwrap();
        assert_eq!(old_cap, Amount::ZERO);
        let old_cap = registry.set_cap(grantor, auth(1), Amount::from(900u64)).unwrap();
        assert_eq!(old_cap, Amount::from(500u64));
    }

    #[test]
    fn untrusted_executor_revoked_after_rotation() {
        let registry = ConsentRegistry::new_in_memory(id(1));
        registry.set_trusted_executor(id(1), id(9), true).unwrap();
        assert!(registry.is_trusted_executor(id(9)));
        registry.set_trusted_executor(id(1), id(9), false).unwrap();
        assert!(!registry.is_trusted_executor(id(9)));
    }

    #[test]
    fn non_controller_cannot_manage_trust() {
        let registry = ConsentRegistry::new_in_memory(id(1));
        let result = registry.set_trusted_executor(id(2), id(9), true);
        assert!(matches!(result, Err(KernelError::NotController)));
    }
}
