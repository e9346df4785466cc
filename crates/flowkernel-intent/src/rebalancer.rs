//! Rebalancer (spec §4.6) — drives one cross-domain `FlowIntent` pull:
//! checks caller and domain approvals, re-validates the lower-level pull
//! authority against `ConsentRegistry`, atomically reserves budget in
//! `IntentRegistry`, then calls out to the source domain's adapter.

use std::sync::Arc;

use tracing::info;

use flowkernel_consent::ConsentRegistry;
use flowkernel_core::{Amount, FlowIntent, Id, IntentHash, KernelError, KernelResult, Signature, Timestamp};
use flowkernel_crypto::GrantorAccount;

use crate::directory::DomainDirectory;
use crate::registry::IntentRegistry;

/// Downstream executor bound to one domain; performs the actual pull on
/// its native ledger (spec glossary: "Adapter"). `h` is the intent hash,
/// used by the adapter as the consent reference on its own ledger.
pub trait SourcePullAdapter {
    fn pull(&self, h: IntentHash, dst: Id, amount: Amount) -> KernelResult<()>;
}

pub struct Rebalancer {
    controller: Id,
    registry: Arc<IntentRegistry>,
    directory: Arc<DomainDirectory>,
    consent: Arc<ConsentRegistry>,
}

impl Rebalancer {
    pub fn new(
        controller: Id,
        registry: Arc<IntentRegistry>,
        directory: Arc<DomainDirectory>,
        consent: Arc<ConsentRegistry>,
    ) -> Self {
        Self {
            controller,
            registry,
            directory,
            consent,
        }
    }

    /// `execute_flow_intent` (spec §4.6 steps 1-8). Returns the intent hash
    /// on success; idiomatic `Result` stands in for the spec's `bool`
    /// return, since every failure branch already carries a distinct
    /// `KernelError` variant callers can match on.
    pub fn execute_flow_intent(
        &self,
        caller: Id,
        intent: &FlowIntent,
        signature: &Signature,
        amount: Amount,
        now: Timestamp,
        account: GrantorAccount<'_>,
        source_pull_adapter: &dyn SourcePullAdapter,
    ) -> KernelResult<IntentHash> {
        // 1. amount > 0; adapter identity is a live trait object, not an id,
        // so "nonzero" is enforced structurally (no adapter, no call).
        if amount.is_zero() {
            return Err(KernelError::AmountZero);
        }

        // 2. Caller is the intent's executor or the controller.
        if caller != intent.executor && caller != self.controller {
            return Err(KernelError::NotAuthorizedCaller);
        }

        // 3. Domain approval on both legs.
        if !self.directory.is_approved_executor(intent.src_domain, intent.executor)? {
            return Err(KernelError::ExecutorNotApproved {
                domain: intent.src_domain,
                executor: intent.executor,
            });
        }
        if !self.directory.is_approved_executor(intent.dst_domain, intent.executor)? {
            return Err(KernelError::ExecutorNotApproved {
                domain: intent.dst_domain,
                executor: intent.executor,
            });
        }

        // 4. The lower-level pull authority (keyed by this intent's own
        // hash, reinterpreted as an auth hash in the shared consent
        // ledger) must still be live.
        let h = crate::registry::intent_hash(intent);
        let as_auth_hash = flowkernel_core::AuthHash::from_bytes(*h.as_bytes());
        if self.consent.is_revoked(as_auth_hash)? {
            return Err(KernelError::Revoked(as_auth_hash));
        }

        // 5. Atomically reserve budget in the registry.
        let h = self
            .registry
            .verify_and_consume(self.controller, intent, signature, amount, now, account)?;

        // 6. Destination lookup.
        let dst = self.directory.receiver_of(intent.dst_domain)?;
        if dst.is_zero() {
            return Err(KernelError::NoDstReceiver(intent.dst_domain));
        }

        // 7. External call to the source domain's adapter.
        source_pull_adapter
            .pull(h, dst, amount)
            .map_err(|e| KernelError::PullFail(e.to_string()))?;

        // Record into the shared consent ledger under the same key (S5),
        // so both flat Authorization pulls and cross-domain intent pulls
        // land in one cumulative audit trail.
        self.consent.record_intent_pull(
            self.controller,
            *h.as_bytes(),
            intent.token,
            intent.grantor,
            intent.executor,
            amount,
        )?;

        // 8. Emit.
        let event = flowkernel_core::events::RebalanceExecuted {
            intent_hash: h,
            src: intent.src_domain,
            dst: intent.dst_domain,
            token: intent.token,
            amount,
            executor: intent.executor,
        };
        info!(?event, "rebalance executed");
        Ok(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowkernel_crypto::{struct_hash, typed_digest, DomainDescriptor, Keypair};

    fn id(b: u8) -> Id {
        Id::from_bytes([b; 32])
    }

    struct MockAdapter {
        fail: bool,
    }

    impl SourcePullAdapter for MockAdapter {
        fn pull(&self, _h: IntentHash, _dst: Id, _amount: Amount) -> KernelResult<()> {
            if self.fail {
                Err(KernelError::PullFail("adapter unreachable".into()))
            } else {
                Ok(())
            }
        }
    }

    /// Spec §8 scenario S5: a 1000-cap intent moved in a 300 then an
    /// 800 step, the second rejected as cap-exceeded; governance then
    /// deactivates the destination domain and the next call is rejected.
    fn scenario() -> (Rebalancer, DomainDescriptor, Keypair, Id, Id, Id) {
        let controller = id(20);
        let executor = id(10);
        let src_domain = id(11);
        let dst_domain = id(12);
        let domain = DomainDescriptor {
            host_id: id(1),
            verifying_instance: controller,
        };

        let intent_registry = Arc::new(IntentRegistry::new_in_memory(domain, controller));
        let directory = Arc::new(DomainDirectory::new_in_memory(controller));
        let consent = Arc::new(ConsentRegistry::new_in_memory(controller));
        consent.set_trusted_executor(controller, controller, true).unwrap();

        directory.set_domain(controller, src_domain, id(30), id(31), true).unwrap();
        directory.set_domain(controller, dst_domain, id(32), id(33), true).unwrap();
        directory.set_executor_approval(controller, src_domain, executor, true).unwrap();
        directory.set_executor_approval(controller, dst_domain, executor, true).unwrap();

        let rebalancer = Rebalancer::new(controller, intent_registry, directory, consent);
        (rebalancer, domain, Keypair::generate(), executor, src_domain, dst_domain)
    }

    fn sign(domain: &DomainDescriptor, kp: &Keypair, intent: &FlowIntent) -> Signature {
        let digest = typed_digest(domain, struct_hash(&intent.canonical_bytes()));
        kp.sign_prehash(digest)
    }

    #[test]
    fn cap_exceeded_after_partial_consumption_then_domain_deactivation_blocks_further_calls() {
        let (rebalancer, domain, kp, executor, src_domain, dst_domain) = scenario();
        let intent = FlowIntent {
            grantor: kp.account_id(),
            executor,
            src_domain,
            dst_domain,
            token: id(40),
            max_total: Amount::from(1000u64),
            valid_after: 0,
            valid_before: 1_000,
            nonce: 1,
            metadata_hash: id(41),
        };
        let sig = sign(&domain, &kp, &intent);
        let adapter = MockAdapter { fail: false };

        let h = rebalancer
            .execute_flow_intent(
                executor,
                &intent,
                &sig,
                Amount::from(300u64),
                100,
                GrantorAccount::KeyHolder,
                &adapter,
            )
            .unwrap();

        let as_auth = flowkernel_core::AuthHash::from_bytes(*h.as_bytes());
        assert_eq!(
            rebalancer.consent.pulled_total(as_auth).unwrap(),
            Amount::from(300u64)
        );

        let result = rebalancer.execute_flow_intent(
            executor,
            &intent,
            &sig,
            Amount::from(800u64),
            100,
            GrantorAccount::KeyHolder,
            &adapter,
        );
        assert!(matches!(result, Err(KernelError::CapExceeded { .. })));

        rebalancer
            .directory
            .set_domain(rebalancer.controller, dst_domain, id(32), id(33), false)
            .unwrap();
        let result = rebalancer.execute_flow_intent(
            executor,
            &intent,
            &sig,
            Amount::from(10u64),
            100,
            GrantorAccount::KeyHolder,
            &adapter,
        );
        assert!(matches!(result, Err(KernelError::ExecutorNotApproved { .. })));
    }

    #[test]
    fn caller_must_be_executor_or_controller() {
        let (rebalancer, domain, kp, executor, src_domain, dst_domain) = scenario();
        let intent = FlowIntent {
            grantor: kp.account_id(),
            executor,
            src_domain,
            dst_domain,
            token: id(40),
            max_total: Amount::from(1000u64),
            valid_after: 0,
            valid_before: 1_000,
            nonce: 1,
            metadata_hash: id(41),
        };
        let sig = sign(&domain, &kp, &intent);
        let adapter = MockAdapter { fail: false };
        let impostor = id(99);

        let result = rebalancer.execute_flow_intent(
            impostor,
            &intent,
            &sig,
            Amount::from(10u64),
            100,
            GrantorAccount::KeyHolder,
            &adapter,
        );
        assert!(matches!(result, Err(KernelError::NotAuthorizedCaller)));
    }

    #[test]
    fn adapter_failure_does_not_record_into_consent_registry() {
        let (rebalancer, domain, kp, executor, src_domain, dst_domain) = scenario();
        let intent = FlowIntent {
            grantor: kp.account_id(),
            executor,
            src_domain,
            dst_domain,
            token: id(40),
            max_total: Amount::from(1000u64),
            valid_after: 0,
            valid_before: 1_000,
            nonce: 1,
            metadata_hash: id(41),
        };
        let sig = sign(&domain, &kp, &intent);
        let adapter = MockAdapter { fail: true };

        let result = rebalancer.execute_flow_intent(
            executor,
            &intent,
            &sig,
            Amount::from(10u64),
            100,
            GrantorAccount::KeyHolder,
            &adapter,
        );
        assert!(matches!(result, Err(KernelError::PullFail(_))));

        let h = crate::registry::intent_hash(&intent);
        let as_auth = flowkernel_core::AuthHash::from_bytes(*h.as_bytes());
        assert_eq!(rebalancer.consent.pulled_total(as_auth).unwrap(), Amount::ZERO);
        // The budget reservation in IntentRegistry DID happen (step 5
        // precedes the external call per spec ordering); only the
        // consent-ledger record and the adapter's own effect are skipped.
        assert_eq!(rebalancer.registry.moved_so_far(h).unwrap(), Amount::from(10u64));
    }
}
