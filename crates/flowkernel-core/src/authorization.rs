use serde::{Deserialize, Serialize};

use crate::ids::Id;
use crate::types::{Amount, Signature, Timestamp};

/// A signed per-call pull consent object ("PPO" in the glossary).
///
/// Never stored whole — only `auth_hash(&self)`'s first seven fields are
/// referenced by [`crate::ids::AuthHash`] (the signature is excluded from
/// the hash, spec §3/§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Authorization {
    pub grantor: Id,
    pub grantee: Id,
    pub token: Id,
    pub max_per_pull: Amount,
    pub valid_after: Timestamp,
    pub valid_before: Timestamp,
    pub nonce: u64,
    pub signature: Signature,
}

/// The seven canonical fields of an [`Authorization`], in the exact order
/// the hash and the signature digest are computed over. Excludes the
/// signature itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizationCore {
    pub grantor: Id,
    pub grantee: Id,
    pub token: Id,
    pub max_per_pull: Amount,
    pub valid_after: Timestamp,
    pub valid_before: Timestamp,
    pub nonce: u64,
}

impl Authorization {
    pub fn core(&self) -> AuthorizationCore {
        AuthorizationCore {
            grantor: self.grantor,
            grantee: self.grantee,
            token: self.token,
            max_per_pull: self.max_per_pull,
            valid_after: self.valid_after,
            valid_before: self.valid_before,
            nonce: self.nonce,
        }
    }
}

impl AuthorizationCore {
    /// Deterministic byte encoding of the seven canonical fields, used as
    /// the pre-image for both `auth_hash` and the signature digest.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("AuthorizationCore serialization is infallible")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Signature;

    fn sample() -> Authorization {
        Authorization {
            grantor: Id::from_bytes([1; 32]),
            grantee: Id::from_bytes([2; 32]),
            token: Id::from_bytes([3; 32]),
            max_per_pull: Amount::from(100u64),
            valid_after: 0,
            valid_before: 1000,
            nonce: 0,
            signature: Signature::from_bytes([9u8; 65]),
        }
    }

    #[test]
    fn core_excludes_signature() {
        let a = sample();
        let mut b = sample();
        b.signature = Signature::from_bytes([0u8; 65]);
        assert_eq!(a.core().canonical_bytes(), b.core().canonical_bytes());
    }

    #[test]
    fn core_changes_with_fields() {
        let a = sample();
        let mut b = sample();
        b.nonce = 1;
        assert_ne!(a.core().canonical_bytes(), b.core().canonical_bytes());
    }
}
