//! Event payloads emitted for indexer consumption (spec §6). Field order
//! matches the spec exactly; every compliant component must emit these.

use serde::{Deserialize, Serialize};

use crate::ids::{AuthHash, Id, IntentHash};
use crate::types::{Amount, Timestamp};

// ── PullExecutor ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PullExecutedDirect {
    pub auth_hash: AuthHash,
    pub token: Id,
    pub grantor: Id,
    pub grantee: Id,
    pub amount: Amount,
}

// ── ConsentRegistry ────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PullExecuted {
    pub auth_hash: AuthHash,
    pub token: Id,
    pub grantor: Id,
    pub grantee: Id,
    pub amount: Amount,
    pub cumulative: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizationRevoked {
    pub auth_hash: AuthHash,
    pub grantor: Id,
    pub ts: Timestamp,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizationBudgetUpdated {
    pub auth_hash: AuthHash,
    pub old_cap: Amount,
    pub new_cap: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizationObserved {
    pub auth_hash: AuthHash,
    pub grantor: Id,
    pub grantee: Id,
    pub token: Id,
}

// ── FlowChannel ────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelOpened {
    pub channel_id: Id,
    pub grantor: Id,
    pub grantee: Id,
    pub token: Id,
    pub rate_per_second: Amount,
    pub max_balance: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelRateUpdated {
    pub id: Id,
    pub old_rate: Amount,
    pub old_cap: Amount,
    pub new_rate: Amount,
    pub new_cap: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelPaused {
    pub channel_id: Id,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelResumed {
    pub channel_id: Id,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelRevoked {
    pub channel_id: Id,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pulled {
    pub id: Id,
    pub to: Id,
    pub amount: Amount,
}

// ── PolicyEnforcer ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyCreated {
    pub policy_id: Id,
    pub grantor: Id,
    pub grantee: Id,
    pub token: Id,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceiverAllowed {
    pub policy_id: Id,
    pub receiver: Id,
    pub allowed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyRevoked {
    pub policy_id: Id,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicySpend {
    pub policy_id: Id,
    pub epoch: u64,
    pub amount: Amount,
    pub new_epoch_total: Amount,
}

// ── IntentRegistry / Rebalancer ────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntentRevoked {
    pub intent_hash: IntentHash,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RebalanceExecuted {
    pub intent_hash: IntentHash,
    pub src: Id,
    pub dst: Id,
    pub token: Id,
    pub amount: Amount,
    pub executor: Id,
}

// ── Router / Mesh ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelRegistered {
    pub channel_id: Id,
    pub weight: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelUpdated {
    pub channel_id: Id,
    pub weight: u64,
    pub active: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Routed {
    pub channel_id: Id,
    pub to: Id,
    pub amount: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DestinationConfigured {
    pub dest: Id,
    pub target_bps: u32,
    pub active: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BalanceReported {
    pub dest: Id,
    pub balance: Amount,
    pub total: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeshStep {
    pub dest: Id,
    pub deficit: Amount,
    pub sent: Amount,
}
