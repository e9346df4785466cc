use thiserror::Error;

use crate::ids::{AuthHash, Id, IntentHash};
use crate::types::Amount;

/// Every failure the kernel can raise. Failures are total and atomic (spec
/// §7): a failing operation leaves every component it touched in its
/// pre-call state, no exceptions other than the ones called out per-call.
#[derive(Debug, Error)]
pub enum KernelError {
    // ── Authorization ──────────────────────────────────────────────────────
    #[error("caller is not the grantor")]
    NotGrantor,

    #[error("caller is not the grantee")]
    NotGrantee,

    #[error("caller is not the controller")]
    NotController,

    #[error("caller is not a trusted executor")]
    NotTrustedExecutor,

    #[error("caller is not authorized for this operation")]
    NotAuthorizedCaller,

    // ── Temporal ───────────────────────────────────────────────────────────
    #[error("authorization not yet valid (valid_after {valid_after}, now {now})")]
    TooSoon { valid_after: u64, now: u64 },

    #[error("authorization expired (valid_before {valid_before}, now {now})")]
    Expired { valid_before: u64, now: u64 },

    // ── Limit ──────────────────────────────────────────────────────────────
    #[error("amount must be greater than zero")]
    AmountZero,

    #[error("amount {requested} exceeds per-call ceiling {max}")]
    ExceedsPerCall { requested: Amount, max: Amount },

    #[error("amount {requested} would exceed per-epoch budget ({spent} + {requested} > {max})")]
    ExceedsEpoch {
        requested: Amount,
        spent: Amount,
        max: Amount,
    },

    #[error("amount {requested} exceeds accrued balance {accrued}")]
    ExceedsAccrued { requested: Amount, accrued: Amount },

    #[error("amount {requested} would exceed cumulative cap ({moved} + {requested} > {max})")]
    CapExceeded {
        requested: Amount,
        moved: Amount,
        max: Amount,
    },

    // ── State ──────────────────────────────────────────────────────────────
    #[error("authorization {0} has been revoked")]
    Revoked(AuthHash),

    #[error("channel {0} has been revoked")]
    ChannelRevoked(Id),

    #[error("intent {0} has been revoked")]
    IntentRevoked(IntentHash),

    #[error("policy {0} has been revoked")]
    PolicyRevoked(Id),

    #[error("channel {0} is paused")]
    Paused(Id),

    #[error("unknown authorization: {0}")]
    UnknownAuthorization(AuthHash),

    #[error("unknown intent: {0}")]
    UnknownIntent(IntentHash),

    #[error("channel already exists: {0}")]
    ChannelExists(Id),

    #[error("unknown channel: {0}")]
    UnknownChannel(Id),

    #[error("unknown policy: {0}")]
    UnknownPolicy(Id),

    #[error("no active route available")]
    NoActiveRoute,

    #[error("destination domain has no registered receiver: {0}")]
    NoDstReceiver(Id),

    #[error("domain is not routable: {0}")]
    ChannelInactive(Id),

    #[error("grantor mismatch")]
    GrantorMismatch,

    #[error("token mismatch")]
    TokenMismatch,

    #[error("receiver {0} is not on the allowlist")]
    ReceiverForbidden(Id),

    #[error("destination executor {executor} is not approved on domain {domain}")]
    ExecutorNotApproved { domain: Id, executor: Id },

    // ── Input ──────────────────────────────────────────────────────────────
    #[error("address must not be the zero id")]
    BadAddress,

    #[error("bad parameters: {0}")]
    BadParameters(String),

    #[error("bad signature: {0}")]
    BadSignature(String),

    #[error("bad id: {0}")]
    BadId(String),

    // ── External ───────────────────────────────────────────────────────────
    #[error("token transfer_from failed")]
    TransferFail,

    #[error("downstream pull failed: {0}")]
    PullFail(String),

    #[error("this token ledger does not support out-of-band funding")]
    DevFundingUnsupported,

    // ── Integrity ──────────────────────────────────────────────────────────
    #[error("reentrant call rejected")]
    Reentrancy,

    #[error("arithmetic overflow")]
    ArithmeticOverflow,

    // ── Storage / serialization (ambient) ────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type KernelResult<T> = Result<T, KernelError>;
