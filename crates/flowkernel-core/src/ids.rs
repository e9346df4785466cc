//! Opaque 32-byte identifiers shared by every component.
//!
//! `Id` is used for every principal and keyed entity — grantor, grantee,
//! token, channel_id, policy_id, domain_id, receiver. `AuthHash` and
//! `IntentHash` are structurally identical 32-byte values but kept as
//! distinct types so a registry keyed by one can never be indexed by the
//! other by accident.

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_newtype {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
        pub struct $name(pub B256);

        impl $name {
            pub const ZERO: $name = $name(B256::ZERO);

            pub fn from_bytes(b: [u8; 32]) -> Self {
                Self(B256::from(b))
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                self.0.as_ref()
            }

            pub fn to_hex(&self) -> String {
                format!("{:#x}", self.0)
            }

            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let bytes = hex::decode(s.trim_start_matches("0x"))?;
                let mut arr = [0u8; 32];
                if bytes.len() != 32 {
                    return Err(hex::FromHexError::InvalidStringLength);
                }
                arr.copy_from_slice(&bytes);
                Ok(Self::from_bytes(arr))
            }

            pub fn is_zero(&self) -> bool {
                self.0 == B256::ZERO
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}…)", stringify!($name), &self.to_hex()[..10])
            }
        }

        impl From<B256> for $name {
            fn from(b: B256) -> Self {
                Self(b)
            }
        }

        impl From<$name> for B256 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

id_newtype!(Id, "");
id_newtype!(AuthHash, "auth:");
id_newtype!(IntentHash, "intent:");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let id = Id::from_bytes([7u8; 32]);
        let s = id.to_hex();
        assert_eq!(Id::from_hex(&s).unwrap(), id);
    }

    #[test]
    fn distinct_types_same_bytes_do_not_collide_in_api() {
        let bytes = [1u8; 32];
        let id = Id::from_bytes(bytes);
        let auth = AuthHash::from_bytes(bytes);
        assert_eq!(id.as_bytes(), auth.as_bytes());
    }
}
