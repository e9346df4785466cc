//! PolicyEnforcer (spec §4.5) — per-policy per-epoch budget, per-call
//! ceiling, and receiver allowlist, consulted by `FlowChannel` and the
//! router before release. Epoch rollover is lazy: the bucket resets the
//! next time `check_and_consume` observes a different epoch, not on a
//! timer.

use std::collections::HashSet;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::info;

use flowkernel_clock::UniversalClock;
use flowkernel_core::{Amount, Id, KernelError, KernelResult};
use flowkernel_storage::{Database, Store};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct PolicyEntry {
    grantor: Id,
    grantee: Id,
    token: Id,
    max_per_pull: Amount,
    max_per_epoch: Amount,
    current_epoch: u64,
    spent_this_epoch: Amount,
    receiver_rules_active: bool,
    allowed_receivers: Vec<Id>,
    revoked: bool,
}

pub struct PolicyEnforcer {
    clock: UniversalClock,
    policies: Store<Id, PolicyEntry>,
    // Guards the read-modify-write on a single policy's epoch bucket; the
    // sled tree itself serializes per-key writes, but this keeps the
    // check-then-consume sequence a single logical critical section
    // per policy, matching the single-entry-per-component discipline.
    lock: RwLock<()>,
}

impl PolicyEnforcer {
    pub fn open(db: &Database, clock: UniversalClock) -> KernelResult<Self> {
        Ok(Self {
            clock,
            policies: db.open_tree("policies")?,
            lock: RwLock::new(()),
        })
    }

    pub fn new_in_memory(clock: UniversalClock) -> Self {
        let db = Database::in_memory().expect("in-memory sled open is infallible");
        Self::open(&db, clock).expect("opening a tree on a fresh db is infallible")
    }

    pub fn create_policy(
        &self,
        caller: Id,
        policy_id: Id,
        grantee: Id,
        token: Id,
        max_per_pull: Amount,
        max_per_epoch: Amount,
    ) -> KernelResult<()> {
        if max_per_pull > max_per_epoch {
            return Err(KernelError::BadParameters(
                "max_per_pull must not exceed max_per_epoch".into(),
            ));
        }
        let _guard = self.lock.write().expect("policy lock poisoned");
        if self.policies.contains(&policy_id) {
            return Err(KernelError::BadParameters("policy_id already in use".into()));
        }
        let entry = PolicyEntry {
            grantor: caller,
            grantee,
            token,
            max_per_pull,
            max_per_epoch,
            current_epoch: 0,
            spent_this_epoch: Amount::ZERO,
            receiver_rules_active: false,
            allowed_receivers: Vec::new(),
            revoked: false,
        };
        self.policies.put(&policy_id, &entry)?;
        let event = flowkernel_core::events::PolicyCreated {
            policy_id,
            grantor: caller,
            grantee,
            token,
        };
        info!(?event, "policy created");
        Ok(())
    }

    fn require_grantor(&self, entry: &PolicyEntry, caller: Id) -> KernelResult<()> {
        if caller == entry.grantor {
            Ok(())
        } else {
            Err(KernelError::NotGrantor)
        }
    }

    pub fn set_receiver_allowed(
        &self,
        caller: Id,
        policy_id: Id,
        receiver: Id,
        allowed: bool,
    ) -> KernelResult<()> {
        let _guard = self.lock.write().expect("policy lock poisoned");
        let mut entry = self
            .policies
            .get(&policy_id)?
            .ok_or(KernelError::UnknownPolicy(policy_id))?;
        self.require_grantor(&entry, caller)?;

        entry.receiver_rules_active = true;
        entry.allowed_receivers.retain(|r| *r != receiver);
        if allowed {
            entry.allowed_receivers.push(receiver);
        }
        self.policies.put(&policy_id, &entry)?;
        let event = flowkernel_core::events::ReceiverAllowed {
            policy_id,
            receiver,
            allowed,
        };
        info!(?event, "receiver allowlist updated");
        Ok(())
    }

    pub fn revoke_policy(&self, caller: Id, policy_id: Id) -> KernelResult<()> {
        let _guard = self.lock.write().expect("policy lock poisoned");
        let mut entry = self
            .policies
            .get(&policy_id)?
            .ok_or(KernelError::UnknownPolicy(policy_id))?;
        self.require_grantor(&entry, caller)?;
        entry.revoked = true;
        self.policies.put(&policy_id, &entry)?;
        info!(event = ?flowkernel_core::events::PolicyRevoked { policy_id }, "policy revoked");
        Ok(())
    }

    /// `check_and_consume` (spec §4.5 steps 1-5). Single-entry per policy
    /// via the enforcer's write lock.
    pub fn check_and_consume(
        &self,
        policy_id: Id,
        caller: Id,
        to: Id,
        amount: Amount,
        now: u64,
    ) -> KernelResult<Amount> {
        let _guard = self.lock.write().expect("policy lock poisoned");

        let mut entry = self
            .policies
            .get(&policy_id)?
            .ok_or(KernelError::UnknownPolicy(policy_id))?;

        if entry.revoked {
            return Err(KernelError::PolicyRevoked(policy_id));
        }
        if caller != entry.grantee {
            return Err(KernelError::NotGrantee);
        }
        if amount.is_zero() {
            return Err(KernelError::AmountZero);
        }
        if amount > entry.max_per_pull {
            return Err(KernelError::ExceedsPerCall {
                requested: amount,
                max: entry.max_per_pull,
            });
        }

        let e = self.clock.current_epoch(now);
        if e != entry.current_epoch {
            entry.current_epoch = e;
            entry.spent_this_epoch = Amount::ZERO;
        }

        let new_spent = entry.spent_this_epoch + amount;
        if new_spent > entry.max_per_epoch {
            return Err(KernelError::ExceedsEpoch {
                requested: amount,
                spent: entry.spent_this_epoch,
                max: entry.max_per_epoch,
            });
        }

        if entry.receiver_rules_active && !entry.allowed_receivers.contains(&to) {
            return Err(KernelError::ReceiverForbidden(to));
        }

        entry.spent_this_epoch = new_spent;
        self.policies.put(&policy_id, &entry)?;

        let event = flowkernel_core::events::PolicySpend {
            policy_id,
            epoch: e,
            amount,
            new_epoch_total: new_spent,
        };
        info!(?event, "policy spend");
        Ok(new_spent)
    }

    pub fn is_revoked(&self, policy_id: Id) -> KernelResult<bool> {
        Ok(self
            .policies
            .get(&policy_id)?
            .map(|e| e.revoked)
            .unwrap_or(false))
    }
}
