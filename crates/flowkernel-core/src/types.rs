use serde::{Deserialize, Serialize};

/// Unsigned 256-bit monetary amount (spec §3: "all monetary amounts are
/// unsigned 256-bit integers").
pub type Amount = alloy_primitives::U256;

/// Unix timestamp in seconds (spec §3: "timestamps are unsigned 64-bit
/// seconds").
pub type Timestamp = u64;

/// A 65-byte recoverable secp256k1 ECDSA signature: `r (32) || s (32) || v (1)`.
///
/// `v` is the recovery id, either 0/1 or its Ethereum-style 27/28 offset;
/// [`flowkernel_crypto`] normalizes on ingestion.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Signature(pub [u8; 65]);

impl Signature {
    pub fn from_bytes(b: [u8; 65]) -> Self {
        Self(b)
    }

    pub fn r(&self) -> &[u8] {
        &self.0[0..32]
    }

    pub fn s(&self) -> &[u8] {
        &self.0[32..64]
    }

    pub fn v(&self) -> u8 {
        self.0[64]
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature(0x{}…)", hex::encode(&self.0[..4]))
    }
}
