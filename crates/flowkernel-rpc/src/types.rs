//! JSON-serializable DTOs for the `flowkernel` RPC surface. Every 32-byte
//! hash/id and every `Amount` crosses the wire as a hex/decimal `String` —
//! `alloy_primitives::U256` and the `Id`/`AuthHash`/`IntentHash` newtypes
//! are not directly `Serialize`-friendly for JSON-RPC clients that expect
//! plain strings (mirrors `chronx_rpc::types`'s base58/hex `String` DTOs).

use serde::{Deserialize, Serialize};

/// A signed `Authorization`, string-encoded for RPC transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcAuthorization {
    pub grantor: String,
    pub grantee: String,
    pub token: String,
    pub max_per_pull: String,
    pub valid_after: u64,
    pub valid_before: u64,
    pub nonce: u64,
    /// Hex-encoded 65-byte `r || s || v` signature.
    pub signature: String,
}

/// A signed `FlowIntent`, string-encoded for RPC transport. The signature
/// is a sibling parameter on every method taking an `RpcFlowIntent`, never
/// embedded, mirroring `flowkernel_core::FlowIntent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcFlowIntent {
    pub grantor: String,
    pub executor: String,
    pub src_domain: String,
    pub dst_domain: String,
    pub token: String,
    pub max_total: String,
    pub valid_after: u64,
    pub valid_before: u64,
    pub nonce: u64,
    pub metadata_hash: String,
}

/// Snapshot of a channel's accrual state, returned by `channel_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcChannelClaimable {
    pub channel_id: String,
    pub claimable: String,
}

/// Node / protocol version information returned by `flowkernel_getVersion`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcVersionInfo {
    pub node_version: String,
    pub protocol_version: String,
    /// Hex-encoded `DomainDescriptor` fields, published so a wallet can
    /// build the exact typed digest this node's components verify against.
    pub domain_host_id: String,
    pub domain_verifying_instance: String,
}
