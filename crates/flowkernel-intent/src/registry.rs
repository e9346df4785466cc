//! IntentRegistry (spec §4.6) — verifies and meters `FlowIntent` consumption.
//! `verify_and_consume` is controller-only; the controller is meant to be
//! the `Rebalancer` itself (or its governance proxy), never an arbitrary
//! caller. Tracks its own `{owner, revoked, moved_so_far}` per intent,
//! independent of `ConsentRegistry`'s separate revocation lever over the
//! same hash (spec §4.6 step 4 treats the two as distinct signals).

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::info;

use flowkernel_core::{Amount, FlowIntent, Id, IntentHash, KernelError, KernelResult, Signature, Timestamp};
use flowkernel_crypto::{struct_hash, typed_digest, verify_signature, DomainDescriptor, GrantorAccount};
use flowkernel_storage::{Database, Store};

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
struct IntentEntry {
    owner: Option<Id>,
    moved_so_far: Amount,
    revoked: bool,
}

/// `intent_hash(intent)` — the deterministic hash of the ten canonical
/// fields (spec §3; the signature is a sibling parameter, never a field).
pub fn intent_hash(intent: &FlowIntent) -> IntentHash {
    IntentHash::from(struct_hash(&intent.canonical_bytes()))
}

pub struct IntentRegistry {
    domain: DomainDescriptor,
    entries: Store<IntentHash, IntentEntry>,
    controller: RwLock<Id>,
}

impl IntentRegistry {
    pub fn open(db: &Database, domain: DomainDescriptor, controller: Id) -> KernelResult<Self> {
        Ok(Self {
            domain,
            entries: db.open_tree("intent_entries")?,
            controller: RwLock::new(controller),
        })
    }

    pub fn new_in_memory(domain: DomainDescriptor, controller: Id) -> Self {
        let db = Database::in_memory().expect("in-memory sled open is infallible");
        Self::open(&db, domain, controller).expect("opening a tree on a fresh db is infallible")
    }

    pub fn controller(&self) -> Id {
        *self.controller.read().expect("controller lock poisoned")
    }

    pub fn rotate_controller(&self, caller: Id, new_controller: Id) -> KernelResult<()> {
        if caller != self.controller() {
            return Err(KernelError::NotController);
        }
        *self.controller.write().expect("controller lock poisoned") = new_controller;
        Ok(())
    }

    /// `verify_and_consume` (spec §4.6 steps 1-6). Single-entry per intent:
    /// the read-modify-write against `entries` happens inline, and sled
    /// serializes writes per key, matching the single-entry-per-component
    /// requirement (spec §5).
    pub fn verify_and_consume(
        &self,
        caller: Id,
        intent: &FlowIntent,
        signature: &Signature,
        amount: Amount,
        now: Timestamp,
        account: GrantorAccount<'_>,
    ) -> KernelResult<IntentHash> {
        if caller != self.controller() {
            return Err(KernelError::NotController);
        }

        // 1. amount > 0; window check.
        if amount.is_zero() {
            return Err(KernelError::AmountZero);
        }
        if now < intent.valid_after {
            return Err(KernelError::TooSoon {
                valid_after: intent.valid_after,
                now,
            });
        }
        if now > intent.valid_before {
            return Err(KernelError::Expired {
                valid_before: intent.valid_before,
                now,
            });
        }

        // 2. h = intent_hash(intent); not revoked.
        let h = intent_hash(intent);
        let mut entry = self.entries.get(&h)?.unwrap_or_default();
        if entry.revoked {
            return Err(KernelError::IntentRevoked(h));
        }

        // 3. moved_so_far + amount <= max_total.
        let new_total = entry.moved_so_far + amount;
        if new_total > intent.max_total {
            return Err(KernelError::CapExceeded {
                requested: amount,
                moved: entry.moved_so_far,
                max: intent.max_total,
            });
        }

        // 4. Verify signature over the typed digest (dual EOA/code-bearing path).
        let digest = typed_digest(&self.domain, struct_hash(&intent.canonical_bytes()));
        verify_signature(intent.grantor, account, digest, signature)
            .map_err(|e| KernelError::BadSignature(e.to_string()))?;

        // 5. Bind owner on first call.
        if entry.owner.is_none() {
            entry.owner = Some(intent.grantor);
        }

        // 6. moved_so_far += amount.
        entry.moved_so_far = new_total;
        self.entries.put(&h, &entry)?;

        info!(intent_hash = %h, %amount, moved_so_far = %new_total, "intent consumed");
        Ok(h)
    }

    pub fn revoke_intent(&self, caller: Id, h: IntentHash) -> KernelResult<()> {
        let mut entry = self.entries.get(&h)?.ok_or(KernelError::UnknownIntent(h))?;
        let owner = entry.owner.ok_or(KernelError::UnknownIntent(h))?;
        if caller != owner {
            return Err(KernelError::NotGrantor);
        }
        entry.revoked = true;
        self.entries.put(&h, &entry)?;
        info!(event = ?flowkernel_core::events::IntentRevoked { intent_hash: h }, "intent revoked");
        Ok(())
    }

    pub fn is_revoked(&self, h: IntentHash) -> KernelResult<bool> {
        Ok(self.entries.get(&h)?.map(|e| e.revoked).unwrap_or(false))
    }

    pub fn moved_so_far(&self, h: IntentHash) -> KernelResult<Amount> {
        Ok(self
            .entries
            .get(&h)?
            .map(|e| e.moved_so_far)
            .unwrap_or(Amount::ZERO))
    }

    pub fn owner_of(&self, h: IntentHash) -> KernelResult<Option<Id>> {
        Ok(self.entries.get(&h)?.and_then(|e| e.owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowkernel_crypto::Keypair;

    fn id(b: u8) -> Id {
        Id::from_bytes([b; 32])
    }

    fn domain(verifying_instance: Id) -> DomainDescriptor {
        DomainDescriptor {
            host_id: id(1),
            verifying_instance,
        }
    }

    fn sign_intent(domain: &DomainDescriptor, kp: &Keypair, intent: &FlowIntent) -> Signature {
        let digest = typed_digest(domain, struct_hash(&intent.canonical_bytes()));
        kp.sign_prehash(digest)
    }

    fn sample_intent(grantor: Id) -> FlowIntent {
        FlowIntent {
            grantor,
            executor: id(10),
            src_domain: id(11),
            dst_domain: id(12),
            token: id(13),
            max_total: Amount::from(1000u64),
            valid_after: 0,
            valid_before: 1_000,
            nonce: 1,
            metadata_hash: id(14),
        }
    }

    #[test]
    fn verify_and_consume_accumulates_and_enforces_cap() {
        let controller = id(20);
        let d = domain(controller);
        let registry = IntentRegistry::new_in_memory(d, controller);
        let kp = Keypair::generate();
        let intent = sample_intent(kp.account_id());
        let sig = sign_intent(&d, &kp, &intent);

        let h = registry
            .verify_and_consume(controller, &intent, &sig, Amount::from(300u64), 100, GrantorAccount::KeyHolder)
            .unwrap();
        assert_eq!(registry.moved_so_far(h).unwrap(), Amount::from(300u64));
        assert_eq!(registry.owner_of(h).unwrap(), Some(kp.account_id()));

        let result = registry.verify_and_consume(
            controller,
            &intent,
            &sig,
            Amount::from(800u64),
            100,
            GrantorAccount::KeyHolder,
        );
        assert!(matches!(result, Err(KernelError::CapExceeded { .. })));
    }

    #[test]
    fn only_controller_may_verify_and_consume() {
        let controller = id(20);
        let d = domain(controller);
        let registry = IntentRegistry::new_in_memory(d, controller);
        let kp = Keypair::generate();
        let intent = sample_intent(kp.account_id());
        let sig = sign_intent(&d, &kp, &intent);

        let impostor = id(99);
        let result = registry.verify_and_consume(
            impostor,
            &intent,
            &sig,
            Amount::from(10u64),
            0,
            GrantorAccount::KeyHolder,
        );
        assert!(matches!(result, Err(KernelError::NotController)));
    }

    #[test]
    fn revoke_intent_blocks_further_consumption() {
        let controller = id(20);
        let d = domain(controller);
        let registry = IntentRegistry::new_in_memory(d, controller);
        let kp = Keypair::generate();
        let intent = sample_intent(kp.account_id());
        let sig = sign_intent(&d, &kp, &intent);

        let h = registry
            .verify_and_consume(controller, &intent, &sig, Amount::from(10u64), 0, GrantorAccount::KeyHolder)
            .unwrap();
        registry.revoke_intent(kp.account_id(), h).unwrap();

        let result = registry.verify_and_consume(
            controller,
            &intent,
            &sig,
            Amount::from(10u64),
            0,
            GrantorAccount::KeyHolder,
        );
        assert!(matches!(result, Err(KernelError::IntentRevoked(_))));
    }

    #[test]
    fn tampered_intent_fails_signature_check() {
        let controller = id(20);
        let d = domain(controller);
        let registry = IntentRegistry::new_in_memory(d, controller);
        let kp = Keypair::generate();
        let mut intent = sample_intent(kp.account_id());
        let sig = sign_intent(&d, &kp, &intent);
        intent.max_total = Amount::from(999_999u64);

        let result = registry.verify_and_consume(
            controller,
            &intent,
            &sig,
            Amount::from(10u64),
            0,
            GrantorAccount::KeyHolder,
        );
        assert!(matches!(result, Err(KernelError::BadSignature(_))));
    }
}
