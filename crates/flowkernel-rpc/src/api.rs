use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{RpcAuthorization, RpcChannelClaimable, RpcFlowIntent, RpcVersionInfo};

/// FlowKernel JSON-RPC 2.0 API definition.
///
/// All method names are prefixed with "flowkernel_" via `namespace =
/// "flowkernel"`. Every signed-object method assumes the grantor
/// authenticates as a key-holder (EOA path); code-bearing accounts are not
/// reachable over this transport (see DESIGN.md).
#[rpc(server, namespace = "flowkernel")]
pub trait FlowKernelApi {
    /// Execute one direct pull under a signed `Authorization` (spec §4.3).
    /// Returns the cumulative amount pulled under this authorization so far.
    #[method(name = "pullDirect")]
    async fn pull_direct(
        &self,
        caller: String,
        auth: RpcAuthorization,
        amount: String,
        now: u64,
    ) -> RpcResult<String>;

    /// Has this authorization hash been revoked?
    #[method(name = "consentIsRevoked")]
    async fn consent_is_revoked(&self, auth_hash: String) -> RpcResult<bool>;

    /// Cumulative amount pulled under this authorization hash.
    #[method(name = "consentPulledTotal")]
    async fn consent_pulled_total(&self, auth_hash: String) -> RpcResult<String>;

    /// The bound owner (grantor) of this authorization hash, if any.
    #[method(name = "consentOwnerOf")]
    async fn consent_owner_of(&self, auth_hash: String) -> RpcResult<Option<String>>;

    /// Revoke an authorization. Caller must be the bound owner.
    #[method(name = "consentRevoke")]
    async fn consent_revoke(&self, caller: String, auth_hash: String, now: u64) -> RpcResult<()>;

    /// Set an advisory cumulative cap on an authorization. Returns the
    /// previous cap (zero if unset).
    #[method(name = "consentSetCap")]
    async fn consent_set_cap(&self, caller: String, auth_hash: String, new_cap: String) -> RpcResult<String>;

    /// Trust or untrust an executor to call `recordPull`/`pullDirect`.
    /// Caller must be the registry's controller.
    #[method(name = "consentSetTrustedExecutor")]
    async fn consent_set_trusted_executor(&self, caller: String, executor: String, trusted: bool) -> RpcResult<()>;

    #[method(name = "consentIsTrustedExecutor")]
    async fn consent_is_trusted_executor(&self, executor: String) -> RpcResult<bool>;

    /// Open a new `FlowChannel` (spec §4.4).
    #[method(name = "channelOpen")]
    #[allow(clippy::too_many_arguments)]
    async fn channel_open(
        &self,
        caller: String,
        channel_id: String,
        grantee: String,
        token: String,
        rate_per_second: String,
        max_balance: String,
        policy_ref: Option<String>,
        now: u64,
    ) -> RpcResult<()>;

    /// Pull `amount` of accrued balance from a channel to `to`.
    #[method(name = "channelPull")]
    async fn channel_pull(
        &self,
        caller: String,
        channel_id: String,
        to: String,
        amount: String,
        now: u64,
    ) -> RpcResult<()>;

    #[method(name = "channelPause")]
    async fn channel_pause(&self, caller: String, channel_id: String, now: u64) -> RpcResult<()>;

    #[method(name = "channelResume")]
    async fn channel_resume(&self, caller: String, channel_id: String, now: u64) -> RpcResult<()>;

    #[method(name = "channelRevoke")]
    async fn channel_revoke(&self, caller: String, channel_id: String, now: u64) -> RpcResult<()>;

    #[method(name = "channelUpdateRate")]
    async fn channel_update_rate(
        &self,
        caller: String,
        channel_id: String,
        new_rate: String,
        new_cap: String,
        now: u64,
    ) -> RpcResult<()>;

    /// Pure projection of claimable balance at `now`; never mutates.
    #[method(name = "channelClaimable")]
    async fn channel_claimable(&self, channel_id: String, now: u64) -> RpcResult<RpcChannelClaimable>;

    /// Create a new per-epoch budget policy (spec §4.5).
    #[method(name = "policyCreate")]
    async fn policy_create(
        &self,
        caller: String,
        policy_id: String,
        grantee: String,
        token: String,
        max_per_pull: String,
        max_per_epoch: String,
    ) -> RpcResult<()>;

    #[method(name = "policySetReceiverAllowed")]
    async fn policy_set_receiver_allowed(
        &self,
        caller: String,
        policy_id: String,
        receiver: String,
        allowed: bool,
    ) -> RpcResult<()>;

    #[method(name = "policyRevoke")]
    async fn policy_revoke(&self, caller: String, policy_id: String) -> RpcResult<()>;

    #[method(name = "policyIsRevoked")]
    async fn policy_is_revoked(&self, policy_id: String) -> RpcResult<bool>;

    /// Verify and meter one consumption of a signed `FlowIntent` (spec
    /// §4.6). Caller must be the `IntentRegistry`'s configured controller.
    /// Returns the intent hash hex.
    #[method(name = "intentVerifyAndConsume")]
    async fn intent_verify_and_consume(
        &self,
        caller: String,
        intent: RpcFlowIntent,
        signature: String,
        amount: String,
        now: u64,
    ) -> RpcResult<String>;

    #[method(name = "intentRevoke")]
    async fn intent_revoke(&self, caller: String, intent_hash: String) -> RpcResult<()>;

    #[method(name = "intentMovedSoFar")]
    async fn intent_moved_so_far(&self, intent_hash: String) -> RpcResult<String>;

    #[method(name = "intentOwnerOf")]
    async fn intent_owner_of(&self, intent_hash: String) -> RpcResult<Option<String>>;

    /// Configure a domain's adapter, receiver, and active flag (spec §4.6).
    #[method(name = "directorySetDomain")]
    async fn directory_set_domain(
        &self,
        caller: String,
        domain_id: String,
        adapter: String,
        destination: String,
        active: bool,
    ) -> RpcResult<()>;

    #[method(name = "directorySetExecutorApproval")]
    async fn directory_set_executor_approval(
        &self,
        caller: String,
        domain_id: String,
        executor: String,
        approved: bool,
    ) -> RpcResult<()>;

    #[method(name = "directoryIsApprovedExecutor")]
    async fn directory_is_approved_executor(&self, domain_id: String, executor: String) -> RpcResult<bool>;

    /// Drive one cross-domain pull under a signed `FlowIntent` through the
    /// `Rebalancer`, dispatching to the source domain's registered adapter
    /// (spec §4.6). Returns the intent hash hex.
    #[method(name = "rebalancerExecuteFlowIntent")]
    async fn rebalancer_execute_flow_intent(
        &self,
        caller: String,
        intent: RpcFlowIntent,
        signature: String,
        amount: String,
        now: u64,
    ) -> RpcResult<String>;

    /// Register a channel with the router under a routing weight (spec §4.7).
    #[method(name = "routerRegisterChannel")]
    async fn router_register_channel(
        &self,
        caller: String,
        channel_id: String,
        weight: u64,
        active: bool,
    ) -> RpcResult<()>;

    #[method(name = "routerSetActive")]
    async fn router_set_active(&self, caller: String, channel_id: String, active: bool) -> RpcResult<()>;

    /// Pull the best active channel's claimable balance toward `to`, up to
    /// `max_desired`. Returns the amount actually moved.
    #[method(name = "routerRouteStep")]
    async fn router_route_step(
        &self,
        caller: String,
        to: String,
        max_desired: String,
        now: u64,
    ) -> RpcResult<String>;

    #[method(name = "meshRegisterDestination")]
    async fn mesh_register_destination(
        &self,
        caller: String,
        destination: String,
        target_bps: u64,
        active: bool,
    ) -> RpcResult<()>;

    /// Report the destination balances and grand total the mesh should
    /// rebalance against (spec §4.7).
    #[method(name = "meshReportBalances")]
    async fn mesh_report_balances(
        &self,
        caller: String,
        balances: std::collections::HashMap<String, String>,
        total: String,
    ) -> RpcResult<()>;

    /// Steer one step toward the most underweight destination. Returns
    /// `None` if no destination is currently below its target share.
    #[method(name = "meshRebalanceTick")]
    async fn mesh_rebalance_tick(
        &self,
        caller: String,
        max_step_amount: String,
        now: u64,
    ) -> RpcResult<Option<String>>;

    #[method(name = "getVersion")]
    async fn get_version(&self) -> RpcResult<RpcVersionInfo>;

    /// Reference-ledger funding utility: directly credits `owner`'s
    /// balance of `token`. Exists only so local development and
    /// integration tests can fund the node's in-memory demo ledger
    /// without a real custodian attached; a production `TokenLedger`
    /// implementation rejects this (see `TokenLedger::dev_credit`).
    #[method(name = "devFundCredit")]
    async fn dev_fund_credit(&self, token: String, owner: String, amount: String) -> RpcResult<()>;

    /// Reference-ledger funding utility: directly sets `spender`'s
    /// allowance over `owner`'s balance of `token`. Same caveat as
    /// `devFundCredit`.
    #[method(name = "devFundApprove")]
    async fn dev_fund_approve(&self, token: String, owner: String, spender: String, amount: String) -> RpcResult<()>;
}
