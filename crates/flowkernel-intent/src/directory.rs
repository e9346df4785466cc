//! DomainDirectory (spec §4.6) — controller-curated map from domain id to
//! its adapter, receiver, active flag, and approved-executor allowlist.

use std::collections::HashSet;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::info;

use flowkernel_core::{Id, KernelError, KernelResult};
use flowkernel_storage::{Database, Store};

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
struct DomainEntry {
    adapter: Id,
    destination: Id,
    active: bool,
    approved_executors: HashSet<Id>,
}

pub struct DomainDirectory {
    domains: Store<Id, DomainEntry>,
    controller: RwLock<Id>,
}

impl DomainDirectory {
    pub fn open(db: &Database, controller: Id) -> KernelResult<Self> {
        Ok(Self {
            domains: db.open_tree("domain_entries")?,
            controller: RwLock::new(controller),
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

    pub fn rotate_controller(&self, caller: Id, new_controller: Id) -> KernelResult<()> {
        self.require_controller(caller)?;
        *self.controller.write().expect("controller lock poisoned") = new_controller;
        Ok(())
    }

    /// `set_domain`: if `active`, both `adapter` and `destination` must be
    /// nonzero (spec §4.6).
    pub fn set_domain(
        &self,
        caller: Id,
        domain_id: Id,
        adapter: Id,
        destination: Id,
        active: bool,
    ) -> KernelResult<()> {
        self.require_controller(caller)?;
        if active && (adapter.is_zero() || destination.is_zero()) {
            return Err(KernelError::BadAddress);
        }
        let mut entry = self.domains.get(&domain_id)?.unwrap_or_default();
        entry.adapter = adapter;
        entry.destination = destination;
        entry.active = active;
        self.domains.put(&domain_id, &entry)?;
        info!(%domain_id, %adapter, %destination, active, "domain configured");
        Ok(())
    }

    pub fn set_executor_approval(
        &self,
        caller: Id,
        domain_id: Id,
        executor: Id,
        approved: bool,
    ) -> KernelResult<()> {
        self.require_controller(caller)?;
        let mut entry = self
            .domains
            .get(&domain_id)?
            .ok_or(KernelError::BadParameters("unknown domain".into()))?;
        if approved {
            entry.approved_executors.insert(executor);
        } else {
            entry.approved_executors.remove(&executor);
        }
        self.domains.put(&domain_id, &entry)?;
        info!(%domain_id, %executor, approved, "executor approval updated");
        Ok(())
    }

    pub fn is_approved_executor(&self, domain_id: Id, executor: Id) -> KernelResult<bool> {
        Ok(self
            .domains
            .get(&domain_id)?
            .map(|e| e.active && e.approved_executors.contains(&executor))
            .unwrap_or(false))
    }

    pub fn receiver_of(&self, domain_id: Id) -> KernelResult<Id> {
        Ok(self
            .domains
            .get(&domain_id)?
            .map(|e| e.destination)
            .unwrap_or(Id::ZERO))
    }

    pub fn adapter_of(&self, domain_id: Id) -> KernelResult<Id> {
        Ok(self.domains.get(&domain_id)?.map(|e| e.adapter).unwrap_or(Id::ZERO))
    }

    pub fn is_active(&self, domain_id: Id) -> KernelResult<bool> {
        Ok(self.domains.get(&domain_id)?.map(|e| e.active).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> Id {
        Id::from_bytes([b; 32])
    }

    #[test]
    fn set_domain_rejects_zero_addresses_when_active() {
        let controller = id(1);
        let directory = DomainDirectory::new_in_memory(controller);
        let result = directory.set_domain(controller, id(2), Id::ZERO, id(3), true);
        assert!(matches!(result, Err(KernelError::BadAddress)));
    }

    #[test]
    fn approved_executor_requires_active_domain() {
        let controller = id(1);
        let directory = DomainDirectory::new_in_memory(controller);
        let domain_id = id(2);
        let executor = id(5);
        directory.set_domain(controller, domain_id, id(3), id(4), true).unwrap();
        directory.set_executor_approval(controller, domain_id, executor, true).unwrap();
        assert!(directory.is_approved_executor(domain_id, executor).unwrap());

        directory.set_domain(controller, domain_id, id(3), id(4), false).unwrap();
        assert!(!directory.is_approved_executor(domain_id, executor).unwrap());
    }

    #[test]
    fn receiver_and_adapter_lookups() {
        let controller = id(1);
        let directory = DomainDirectory::new_in_memory(controller);
        let domain_id = id(2);
        directory.set_domain(controller, domain_id, id(3), id(4), true).unwrap();
        assert_eq!(directory.receiver_of(domain_id).unwrap(), id(4));
        assert_eq!(directory.adapter_of(domain_id).unwrap(), id(3));
    }

    #[test]
    fn non_controller_cannot_configure_domains() {
        let controller = id(1);
        let directory = DomainDirectory::new_in_memory(controller);
        let result = directory.set_domain(id(9), id(2), id(3), id(4), true);
        assert!(matches!(result, Err(KernelError::NotController)));
    }
}
