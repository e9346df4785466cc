//! A secp256k1 keypair with its derived [`Id`], used by `flowkernel-wallet`
//! and by tests across the workspace to produce real signatures.

use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{RecoveryId, Signature as K256Signature, SigningKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use alloy_primitives::B256;
use flowkernel_core::{Id, Signature};

use crate::ecdsa::account_id_from_pubkey;

/// Key-holder keypair. `SigningKey` zeroizes its scalar on drop internally
/// (it is built on `elliptic-curve::SecretKey`), so no manual `Drop` impl
/// is needed here.
pub struct Keypair {
    signing_key: SigningKey,
    account_id: Id,
}

impl Keypair {
    /// Generate a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    /// Restore a keypair from a raw 32-byte scalar (e.g. loaded from a
    /// wallet file).
    pub fn from_raw(secret: [u8; 32]) -> Result<Self, k256::ecdsa::Error> {
        let secret = Zeroizing::new(secret);
        let signing_key = SigningKey::from_bytes((&*secret).into())?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        let uncompressed = verifying_key.to_encoded_point(false);
        let account_id = account_id_from_pubkey(uncompressed.as_bytes());
        Self {
            signing_key,
            account_id,
        }
    }

    pub fn account_id(&self) -> Id {
        self.account_id
    }

    /// Export the raw 32-byte scalar, e.g. to persist into a wallet keyfile.
    /// Callers are responsible for keeping the result off disk in plaintext
    /// wherever possible.
    pub fn to_raw_bytes(&self) -> [u8; 32] {
        let bytes = self.signing_key.to_bytes();
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        out
    }

    /// Sign a prehashed digest, returning the 65-byte `r ‖ s ‖ v` signature
    /// this workspace uses on the wire, with `v` in the `{0, 1}` convention.
    pub fn sign_prehash(&self, digest: B256) -> Signature {
        let (sig, recid): (K256Signature, RecoveryId) = self
            .signing_key
            .sign_prehash_recoverable(digest.as_slice())
            .expect("signing over a 32-byte prehash is infallible");

        let mut bytes = [0u8; 65];
        bytes[0..64].copy_from_slice(&sig.to_bytes());
        bytes[64] = recid.to_byte();
        Signature::from_bytes(bytes)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keypair {{ account_id: {:?} }}", self.account_id)
    }
}
