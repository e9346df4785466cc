//! PullExecutor (spec §4.3) — verifies and executes one per-call pull
//! against a signed `Authorization`, then records it into a
//! `ConsentRegistry`. Holds an immutable domain descriptor binding every
//! signature it verifies to this instance, so a signature can never be
//! replayed against a different host or executor.

use std::sync::Arc;

use tracing::info;

use flowkernel_consent::ConsentRegistry;
use flowkernel_core::{Amount, AuthHash, Authorization, Id, KernelError, KernelResult, Timestamp};
use flowkernel_crypto::{struct_hash, typed_digest, verify_signature, DomainDescriptor, GrantorAccount};
use flowkernel_token::TokenLedger;

/// `auth_hash(auth)` — the deterministic hash of the signature-excluded
/// canonical fields (spec §3).
pub fn auth_hash(auth: &Authorization) -> AuthHash {
    AuthHash::from(struct_hash(&auth.core().canonical_bytes()))
}

pub struct PullExecutor {
    domain: DomainDescriptor,
    registry: Arc<ConsentRegistry>,
    token: Arc<dyn TokenLedger>,
}

impl PullExecutor {
    pub fn new(domain: DomainDescriptor, registry: Arc<ConsentRegistry>, token: Arc<dyn TokenLedger>) -> Self {
        Self {
            domain,
            registry,
            token,
        }
    }

    /// Execute one pull under `auth` for `amount`, as the grantee.
    ///
    /// `account` describes how `auth.grantor` authenticates (key-holder
    /// or code-bearing); the caller resolves this out of band (spec §9).
    pub fn pull(
        &self,
        caller: Id,
        auth: &Authorization,
        amount: Amount,
        now: Timestamp,
        account: GrantorAccount<'_>,
    ) -> KernelResult<Amount> {
        // 1. auth_hash over the signature-excluded canonical fields.
        let h = auth_hash(auth);

        // 2. Not revoked.
        if self.registry.is_revoked(h)? {
            return Err(KernelError::Revoked(h));
        }

        // 3. Caller must be the grantee.
        if caller != auth.grantee {
            return Err(KernelError::NotGrantee);
        }

        // 4. Window check.
        if now < auth.valid_after {
            return Err(KernelError::TooSoon {
                valid_after: auth.valid_after,
                now,
            });
        }
        if now > auth.valid_before {
            return Err(KernelError::Expired {
                valid_before: auth.valid_before,
                now,
            });
        }

        // 5. Per-call ceiling.
        if amount.is_zero() {
            return Err(KernelError::AmountZero);
        }
        if amount > auth.max_per_pull {
            return Err(KernelError::ExceedsPerCall {
                requested: amount,
                max: auth.max_per_pull,
            });
        }

        // 6. Verify the signature over the typed digest binding this host
        // and this executor instance to the canonical authorization fields.
        let digest = typed_digest(&self.domain, struct_hash(&auth.core().canonical_bytes()));
        verify_signature(auth.grantor, account, digest, &auth.signature)
            .map_err(|e| KernelError::BadSignature(e.to_string()))?;

        // 7. Drive the external token ledger. Effects-before-external: no
        // kernel state has been mutated yet, so a transfer failure leaves
        // nothing to roll back.
        self.token
            .transfer_from(auth.token, caller, auth.grantor, auth.grantee, amount)
            .map_err(|_| KernelError::TransferFail)?;

        // 8. Record into the registry only once the transfer has succeeded.
        // `record_pull` gates on the trusted-executor identity, which is
        // this executor's own bound instance (`self.domain.verifying_instance`),
        // not the external caller — the caller only has to be the grantee.
        let cumulative = self.registry.record_pull(
            self.domain.verifying_instance,
            h,
            auth.token,
            auth.grantor,
            auth.grantee,
            amount,
        )?;

        // 9. Emit.
        let event = flowkernel_core::events::PullExecutedDirect {
            auth_hash: h,
            token: auth.token,
            grantor: auth.grantor,
            grantee: auth.grantee,
            amount,
        };
        info!(?event, "pull executed directly");

        Ok(cumulative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowkernel_core::{AuthHash, Id as KId};
    use flowkernel_crypto::Keypair;
    use flowkernel_token::SimpleTokenLedger;

    fn setup(
        executor_id: KId,
    ) -> (
        PullExecutor,
        Arc<ConsentRegistry>,
        Arc<SimpleTokenLedger>,
        Keypair,
    ) {
        let registry = Arc::new(ConsentRegistry::new_in_memory(executor_id));
        registry.set_trusted_executor(executor_id, executor_id, true).unwrap();
        let token = Arc::new(SimpleTokenLedger::new());
        let domain = DomainDescriptor {
            host_id: KId::from_bytes([1; 32]),
            verifying_instance: executor_id,
        };
        let grantor_kp = Keypair::generate();
        let executor = PullExecutor::new(domain, registry.clone(), token.clone());
        (executor, registry, token, grantor_kp)
    }

    fn sign_auth(
        domain: &DomainDescriptor,
        kp: &Keypair,
        grantee: KId,
        token: KId,
        max_per_pull: Amount,
        valid_after: Timestamp,
        valid_before: Timestamp,
        nonce: u64,
    ) -> Authorization {
        let core = flowkernel_core::AuthorizationCore {
            grantor: kp.account_id(),
            grantee,
            token,
            max_per_pull,
            valid_after,
            valid_before,
            nonce,
        };
        let digest = typed_digest(domain, struct_hash(&core.canonical_bytes()));
        let signature = kp.sign_prehash(digest);
        Authorization {
            grantor: core.grantor,
            grantee: core.grantee,
            token: core.token,
            max_per_pull: core.max_per_pull,
            valid_after: core.valid_after,
            valid_before: core.valid_before,
            nonce: core.nonce,
            signature,
        }
    }

    #[test]
    fn successful_pull_moves_tokens_and_records_consent() {
        let executor_id = KId::from_bytes([9; 32]);
        let (executor, registry, token, kp) = setup(executor_id);
        let grantee = KId::from_bytes([4; 32]);
        let token_id = KId::from_bytes([5; 32]);

        let domain = DomainDescriptor {
            host_id: KId::from_bytes([1; 32]),
            verifying_instance: executor_id,
        };
        let auth = sign_auth(&domain, &kp, grantee, token_id, Amount::from(100u64), 0, 1_000, 1);

        token.credit(token_id, kp.account_id(), Amount::from(500u64));
        token.approve(token_id, kp.account_id(), grantee, Amount::from(500u64));

        let cumulative = executor
            .pull(grantee, &auth, Amount::from(60u64), 10, GrantorAccount::KeyHolder)
            .unwrap();
        assert_eq!(cumulative, Amount::from(60u64));
        assert_eq!(token.balance_of(token_id, kp.account_id()), Amount::from(440u64));
        assert_eq!(token.balance_of(token_id, grantee), Amount::from(60u64));

        let h = auth_hash(&auth);
        assert_eq!(registry.pulled_total(h).unwrap(), Amount::from(60u64));
        assert_eq!(registry.owner_of(h).unwrap(), Some(kp.account_id()));
    }

    #[test]
    fn revoked_authorization_is_rejected() {
        let executor_id = KId::from_bytes([9; 32]);
        let (executor, registry, token, kp) = setup(executor_id);
        let grantee = KId::from_bytes([4; 32]);
        let token_id = KId::from_bytes([5; 32]);
        let domain = DomainDescriptor {
            host_id: KId::from_bytes([1; 32]),
            verifying_instance: executor_id,
        };
        let auth = sign_auth(&domain, &kp, grantee, token_id, Amount::from(100u64), 0, 1_000, 1);
        token.credit(token_id, kp.account_id(), Amount::from(500u64));
        token.approve(token_id, kp.account_id(), grantee, Amount::from(500u64));

        let h: AuthHash = auth_hash(&auth);
        // Bind the owner first via an observing trusted-executor pull, then revoke.
        executor
            .pull(grantee, &auth, Amount::from(10u64), 10, GrantorAccount::KeyHolder)
            .unwrap();
        registry.revoke(kp.account_id(), h, 20).unwrap();

        let result = executor.pull(grantee, &auth, Amount::from(10u64), 30, GrantorAccount::KeyHolder);
        assert!(matches!(result, Err(KernelError::Revoked(_))));
    }

    #[test]
    fn wrong_caller_is_rejected() {
        let executor_id = KId::from_bytes([9; 32]);
        let (executor, _registry, token, kp) = setup(executor_id);
        let grantee = KId::from_bytes([4; 32]);
        let token_id = KId::from_bytes([5; 32]);
        let domain = DomainDescriptor {
            host_id: KId::from_bytes([1; 32]),
            verifying_instance: executor_id,
        };
        let auth = sign_auth(&domain, &kp, grantee, token_id, Amount::from(100u64), 0, 1_000, 1);
        token.credit(token_id, kp.account_id(), Amount::from(500u64));
        token.approve(token_id, kp.account_id(), grantee, Amount::from(500u64));

        let impostor = KId::from_bytes([42; 32]);
        let result = executor.pull(impostor, &auth, Amount::from(10u64), 10, GrantorAccount::KeyHolder);
        assert!(matches!(result, Err(KernelError::NotGrantee)));
    }

    #[test]
    fn amount_exceeding_per_call_ceiling_is_rejected() {
        let executor_id = KId::from_bytes([9; 32]);
        let (executor, _registry, token, kp) = setup(executor_id);
        let grantee = KId::from_bytes([4; 32]);
        let token_id = KId::from_bytes([5; 32]);
        let domain = DomainDescriptor {
            host_id: KId::from_bytes([1; 32]),
            verifying_instance: executor_id,
        };
        let auth = sign_auth(&domain, &kp, grantee, token_id, Amount::from(100u64), 0, 1_000, 1);
        token.credit(token_id, kp.account_id(), Amount::from(500u64));
        token.approve(token_id, kp.account_id(), grantee, Amount::from(500u64));

        let result = executor.pull(grantee, &auth, Amount::from(200u64), 10, GrantorAccount::KeyHolder);
        assert!(matches!(result, Err(KernelError::ExceedsPerCall { .. })));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let executor_id = KId::from_bytes([9; 32]);
        let (executor, _registry, token, kp) = setup(executor_id);
        let grantee = KId::from_bytes([4; 32]);
        let token_id = KId::from_bytes([5; 32]);
        let domain = DomainDescriptor {
            host_id: KId::from_bytes([1; 32]),
            verifying_instance: executor_id,
        };
        let mut auth = sign_auth(&domain, &kp, grantee, token_id, Amount::from(100u64), 0, 1_000, 1);
        // Tamper with a canonical field after signing: the signature no
        // longer covers the struct hash of the mutated authorization.
        auth.max_per_pull = Amount::from(999u64);
        token.credit(token_id, kp.account_id(), Amount::from(500u64));
        token.approve(token_id, kp.account_id(), grantee, Amount::from(500u64));

        let result = executor.pull(grantee, &auth, Amount::from(10u64), 10, GrantorAccount::KeyHolder);
        assert!(matches!(result, Err(KernelError::BadSignature(_))));
    }
}
