//! secp256k1 ECDSA verification with mandatory low-`s` enforcement, plus
//! the "code-bearing account" verification path (spec §4.3, §6).

use alloy_primitives::B256;
use k256::ecdsa::{RecoveryId, Signature as K256Signature, VerifyingKey};
use thiserror::Error;

use flowkernel_core::constants::CODE_VERIFIER_MAGIC;
use flowkernel_core::{Id, Signature};

use crate::hash::keccak256;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("signature has non-canonical (high) s value")]
    HighS,
    #[error("signature has an invalid recovery id: {0}")]
    BadRecoveryId(u8),
    #[error("malformed signature bytes: {0}")]
    Malformed(String),
    #[error("recovered address does not match grantor")]
    WrongSigner,
    #[error("code-bearing account returned wrong magic value")]
    WrongMagic,
}

/// Derive the protocol's 32-byte account id from an uncompressed SEC1
/// public key, the ECDSA analogue of `chronx_crypto::hash::account_id_from_pubkey`.
pub fn account_id_from_pubkey(uncompressed_pubkey: &[u8]) -> Id {
    Id::from(keccak256(uncompressed_pubkey))
}

/// Parse a [`Signature`] into a low-s-enforced k256 signature plus recovery id.
fn parse_and_check_low_s(sig: &Signature) -> Result<(K256Signature, RecoveryId), VerifyError> {
    let k_sig = K256Signature::from_slice(&sig.0[0..64])
        .map_err(|e| VerifyError::Malformed(e.to_string()))?;

    // Reject non-canonical (high-s) signatures outright: normalize_s
    // returns Some(_) only when the input was NOT already low-s.
    if k_sig.normalize_s().is_some() {
        return Err(VerifyError::HighS);
    }

    let v = sig.v();
    let rec_byte = match v {
        0 | 1 => v,
        27 | 28 => v - 27,
        other => return Err(VerifyError::BadRecoveryId(other)),
    };
    let recovery_id =
        RecoveryId::from_byte(rec_byte).ok_or(VerifyError::BadRecoveryId(rec_byte))?;

    Ok((k_sig, recovery_id))
}

/// Recover the signer's account id from a prehashed digest and signature,
/// enforcing low-`s` (the key-holder / EOA verification path).
pub fn recover_account_id(digest: B256, sig: &Signature) -> Result<Id, VerifyError> {
    let (k_sig, recovery_id) = parse_and_check_low_s(sig)?;
    let vk = VerifyingKey::recover_from_prehash(digest.as_slice(), &k_sig, recovery_id)
        .map_err(|e| VerifyError::Malformed(e.to_string()))?;
    let encoded = vk.to_encoded_point(false);
    Ok(account_id_from_pubkey(encoded.as_bytes()))
}

/// Verify that `sig` was produced by `grantor` over `digest` via the
/// key-holder path: recover and compare.
pub fn verify_eoa(grantor: Id, digest: B256, sig: &Signature) -> Result<(), VerifyError> {
    let recovered = recover_account_id(digest, sig)?;
    if recovered == grantor {
        Ok(())
    } else {
        Err(VerifyError::WrongSigner)
    }
}

/// A code-bearing account's signature verification hook (spec §4.3/§9,
/// modeled on ERC-1271's `isValidSignature`). Implementations return the
/// fixed acceptance tag [`CODE_VERIFIER_MAGIC`] iff the signature is valid
/// for the given digest under whatever internal logic the account uses
/// (multisig threshold, session keys, policy checks, ...).
pub trait CodeVerifier {
    fn is_valid_signature(&self, digest: B256, signature: &Signature) -> [u8; 4];
}

/// How a grantor authenticates: either a plain key-holder (EOA path) or a
/// programmable account that owns a [`CodeVerifier`] hook (spec §9: "MUST
/// NOT assume EOA-only; they MUST probe for a verification hook").
pub enum GrantorAccount<'a> {
    KeyHolder,
    CodeBearing(&'a dyn CodeVerifier),
}

/// Dual-path signature verification (spec §4.3 step 6 / §6 / §9).
pub fn verify_signature(
    grantor: Id,
    account: GrantorAccount<'_>,
    digest: B256,
    sig: &Signature,
) -> Result<(), VerifyError> {
    match account {
        GrantorAccount::KeyHolder => verify_eoa(grantor, digest, sig),
        GrantorAccount::CodeBearing(hook) => {
            if hook.is_valid_signature(digest, sig) == CODE_VERIFIER_MAGIC {
                Ok(())
            } else {
                Err(VerifyError::WrongMagic)
            }
        }
    }
}
