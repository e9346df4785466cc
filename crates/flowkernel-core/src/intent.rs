use serde::{Deserialize, Serialize};

use crate::ids::Id;
use crate::types::{Amount, Timestamp};

/// A signed cross-domain consent envelope (RIP-003 in spec §3). The
/// signature is not a field here — `IntentRegistry::verify_and_consume`
/// takes it as a sibling parameter, unlike [`crate::authorization::Authorization`]
/// which embeds its signature.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowIntent {
    pub grantor: Id,
    pub executor: Id,
    pub src_domain: Id,
    pub dst_domain: Id,
    pub token: Id,
    pub max_total: Amount,
    pub valid_after: Timestamp,
    pub valid_before: Timestamp,
    pub nonce: u64,
    pub metadata_hash: Id,
}

impl FlowIntent {
    /// Deterministic byte encoding of the full field list, used as the
    /// pre-image for both `intent_hash` and the signature digest.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("FlowIntent serialization is infallible")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FlowIntent {
        FlowIntent {
            grantor: Id::from_bytes([1; 32]),
            executor: Id::from_bytes([2; 32]),
            src_domain: Id::from_bytes([3; 32]),
            dst_domain: Id::from_bytes([4; 32]),
            token: Id::from_bytes([5; 32]),
            max_total: Amount::from(1000u64),
            valid_after: 0,
            valid_before: 1000,
            nonce: 0,
            metadata_hash: Id::from_bytes([6; 32]),
        }
    }

    #[test]
    fn canonical_bytes_change_with_amount() {
        let a = sample();
        let mut b = sample();
        b.max_total = Amount::from(1u64);
        assert_ne!(a.canonical_bytes(), b.canonical_bytes());
    }
}
