pub mod ecdsa;
pub mod hash;
pub mod keypair;

pub use ecdsa::{
    account_id_from_pubkey, recover_account_id, verify_eoa, verify_signature, CodeVerifier,
    GrantorAccount, VerifyError,
};
pub use hash::{keccak256, struct_hash, typed_digest, DomainDescriptor};
pub use keypair::Keypair;
