//! Canonical hashing: domain descriptors, struct hashes, and the typed
//! digest a signature is computed over (spec §4.3/§6).

use alloy_primitives::B256;
use sha3::{Digest, Keccak256};

use flowkernel_core::constants::{PROTOCOL_NAME, PROTOCOL_VERSION};
use flowkernel_core::Id;

/// Keccak-256 of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    B256::from_slice(&hasher.finalize())
}

/// Binds a signature to one verifying instance on one host so it can never
/// replay across hosts or across separate deployments of the same
/// component (spec §6).
#[derive(Clone, Copy, Debug)]
pub struct DomainDescriptor {
    pub host_id: Id,
    pub verifying_instance: Id,
}

impl DomainDescriptor {
    /// `D = hash(name, version, host_id, self_address)`.
    pub fn hash(&self) -> B256 {
        let mut bytes = Vec::with_capacity(
            PROTOCOL_NAME.len() + PROTOCOL_VERSION.len() + 32 + 32,
        );
        bytes.extend_from_slice(PROTOCOL_NAME.as_bytes());
        bytes.extend_from_slice(PROTOCOL_VERSION.as_bytes());
        bytes.extend_from_slice(self.host_id.as_bytes());
        bytes.extend_from_slice(self.verifying_instance.as_bytes());
        keccak256(&bytes)
    }
}

/// `\x19`-prefixed typed-data tag, analogous to EIP-191/EIP-712's `\x19\x01`
/// prefix, disambiguating this digest from a raw message hash.
const TYPED_DATA_PREFIX: &[u8] = b"\x19FlowKernel Typed Data\x01";

/// `hash(prefix || D || struct_hash(payload))` — the digest a grantor
/// actually signs (spec §4.3 step 6, §6).
pub fn typed_digest(domain: &DomainDescriptor, struct_hash: B256) -> B256 {
    let mut bytes = Vec::with_capacity(TYPED_DATA_PREFIX.len() + 32 + 32);
    bytes.extend_from_slice(TYPED_DATA_PREFIX);
    bytes.extend_from_slice(domain.hash().as_slice());
    bytes.extend_from_slice(struct_hash.as_slice());
    keccak256(&bytes)
}

/// Hash of the canonical (signature-excluded) byte encoding of a signed
/// struct — used both as `auth_hash`/`intent_hash` and as the struct-hash
/// component of the typed digest.
pub fn struct_hash(canonical_bytes: &[u8]) -> B256 {
    keccak256(canonical_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_hash_is_deterministic() {
        let d = DomainDescriptor {
            host_id: Id::from_bytes([1; 32]),
            verifying_instance: Id::from_bytes([2; 32]),
        };
        assert_eq!(d.hash(), d.hash());
    }

    #[test]
    fn domain_hash_differs_per_instance() {
        let host = Id::from_bytes([1; 32]);
        let d1 = DomainDescriptor {
            host_id: host,
            verifying_instance: Id::from_bytes([2; 32]),
        };
        let d2 = DomainDescriptor {
            host_id: host,
            verifying_instance: Id::from_bytes([3; 32]),
        };
        assert_ne!(d1.hash(), d2.hash());
    }
}
