use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use flowkernel_channel::FlowChannel;
use flowkernel_consent::ConsentRegistry;
use flowkernel_core::{Amount, AuthHash, Authorization, FlowIntent, Id, IntentHash, Signature};
use flowkernel_crypto::{DomainDescriptor, GrantorAccount};
use flowkernel_executor::PullExecutor;
use flowkernel_intent::{DomainDirectory, IntentRegistry, Rebalancer, SourcePullAdapter};
use flowkernel_policy::PolicyEnforcer;
use flowkernel_router::{AdaptiveRouter, SettlementMesh};
use flowkernel_token::TokenLedger;

use crate::api::FlowKernelApiServer;
use crate::types::{RpcAuthorization, RpcChannelClaimable, RpcFlowIntent, RpcVersionInfo};

fn rpc_err(code: i32, msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(code, msg.into(), None::<()>)
}

fn parse_id(s: &str) -> RpcResult<Id> {
    Id::from_hex(s).map_err(|e| rpc_err(-32602, format!("invalid id: {e}")))
}

fn parse_auth_hash(s: &str) -> RpcResult<AuthHash> {
    AuthHash::from_hex(s).map_err(|e| rpc_err(-32602, format!("invalid auth hash: {e}")))
}

fn parse_intent_hash(s: &str) -> RpcResult<IntentHash> {
    IntentHash::from_hex(s).map_err(|e| rpc_err(-32602, format!("invalid intent hash: {e}")))
}

fn parse_amount(s: &str) -> RpcResult<Amount> {
    Amount::from_str(s).map_err(|e| rpc_err(-32602, format!("invalid amount: {e}")))
}

fn parse_signature(s: &str) -> RpcResult<Signature> {
    let bytes = hex::decode(s.trim_start_matches("0x")).map_err(|e| rpc_err(-32602, format!("invalid hex: {e}")))?;
    if bytes.len() != 65 {
        return Err(rpc_err(-32602, "signature must be 65 bytes"));
    }
    let mut arr = [0u8; 65];
    arr.copy_from_slice(&bytes);
    Ok(Signature::from_bytes(arr))
}

fn parse_authorization(a: &RpcAuthorization) -> RpcResult<Authorization> {
    Ok(Authorization {
        grantor: parse_id(&a.grantor)?,
        grantee: parse_id(&a.grantee)?,
        token: parse_id(&a.token)?,
        max_per_pull: parse_amount(&a.max_per_pull)?,
        valid_after: a.valid_after,
        valid_before: a.valid_before,
        nonce: a.nonce,
        signature: parse_signature(&a.signature)?,
    })
}

fn parse_flow_intent(i: &RpcFlowIntent) -> RpcResult<FlowIntent> {
    Ok(FlowIntent {
        grantor: parse_id(&i.grantor)?,
        executor: parse_id(&i.executor)?,
        src_domain: parse_id(&i.src_domain)?,
        dst_domain: parse_id(&i.dst_domain)?,
        token: parse_id(&i.token)?,
        max_total: parse_amount(&i.max_total)?,
        valid_after: i.valid_after,
        valid_before: i.valid_before,
        nonce: i.nonce,
        metadata_hash: parse_id(&i.metadata_hash)?,
    })
}

/// Shared state passed to the RPC server: one instance of every kernel
/// component, plus a registry of per-domain source-pull adapters the
/// `Rebalancer` endpoint dispatches to (an RPC transport has no way to
/// accept a live trait object per call, so adapters are wired in once at
/// node startup and looked up by `FlowIntent::src_domain`).
pub struct RpcServerState {
    pub domain: DomainDescriptor,
    pub consent: Arc<ConsentRegistry>,
    pub executor: Arc<PullExecutor>,
    pub channel: Arc<FlowChannel>,
    pub policy: Arc<PolicyEnforcer>,
    pub intent_registry: Arc<IntentRegistry>,
    pub directory: Arc<DomainDirectory>,
    pub rebalancer: Arc<Rebalancer>,
    pub router: Arc<AdaptiveRouter>,
    pub mesh: Arc<SettlementMesh>,
    pub adapters: HashMap<Id, Arc<dyn SourcePullAdapter + Send + Sync>>,
    /// The same external ledger `executor` and `channel` transfer against,
    /// exposed directly so `devFundCredit`/`devFundApprove` can fund it.
    pub token: Arc<dyn TokenLedger>,
}

pub struct RpcServer {
    state: Arc<RpcServerState>,
}

impl RpcServer {
    pub fn new(state: Arc<RpcServerState>) -> Self {
        Self { state }
    }

    /// Start the JSON-RPC server on `addr` with permissive CORS headers.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new().allow_methods(Any).allow_origin(Any).allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;

        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "flowkernel RPC server started");
        Ok(handle)
    }
}

#[async_trait]
impl FlowKernelApiServer for RpcServer {
    async fn pull_direct(&self, caller: String, auth: RpcAuthorization, amount: String, now: u64) -> RpcResult<String> {
        let caller = parse_id(&caller)?;
        let auth = parse_authorization(&auth)?;
        let amount = parse_amount(&amount)?;
        let cumulative = self
            .state
            .executor
            .pull(caller, &auth, amount, now, GrantorAccount::KeyHolder)
            .map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(cumulative.to_string())
    }

    async fn consent_is_revoked(&self, auth_hash: String) -> RpcResult<bool> {
        let h = parse_auth_hash(&auth_hash)?;
        self.state.consent.is_revoked(h).map_err(|e| rpc_err(-32000, e.to_string()).into())
    }

    async fn consent_pulled_total(&self, auth_hash: String) -> RpcResult<String> {
        let h = parse_auth_hash(&auth_hash)?;
        let total = self.state.consent.pulled_total(h).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(total.to_string())
    }

    async fn consent_owner_of(&self, auth_hash: String) -> RpcResult<Option<String>> {
        let h = parse_auth_hash(&auth_hash)?;
        let owner = self.state.consent.owner_of(h).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(owner.map(|o| o.to_hex()))
    }

    async fn consent_revoke(&self, caller: String, auth_hash: String, now: u64) -> RpcResult<()> {
        let caller = parse_id(&caller)?;
        let h = parse_auth_hash(&auth_hash)?;
        self.state.consent.revoke(caller, h, now).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn consent_set_cap(&self, caller: String, auth_hash: String, new_cap: String) -> RpcResult<String> {
        let caller = parse_id(&caller)?;
        let h = parse_auth_hash(&auth_hash)?;
        let new_cap = parse_amount(&new_cap)?;
        let old_cap = self.state.consent.set_cap(caller, h, new_cap).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(old_cap.to_string())
    }

    async fn consent_set_trusted_executor(&self, caller: String, executor: String, trusted: bool) -> RpcResult<()> {
        let caller = parse_id(&caller)?;
        let executor = parse_id(&executor)?;
        self.state.consent.set_trusted_executor(caller, executor, trusted).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn consent_is_trusted_executor(&self, executor: String) -> RpcResult<bool> {
        let executor = parse_id(&executor)?;
        Ok(self.state.consent.is_trusted_executor(executor))
    }

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
    ) -> RpcResult<()> {
        let caller = parse_id(&caller)?;
        let channel_id = parse_id(&channel_id)?;
        let grantee = parse_id(&grantee)?;
        let token = parse_id(&token)?;
        let rate_per_second = parse_amount(&rate_per_second)?;
        let max_balance = parse_amount(&max_balance)?;
        let policy_ref = policy_ref.map(|p| parse_id(&p)).transpose()?;
        self.state
            .channel
            .open(caller, channel_id, grantee, token, rate_per_second, max_balance, policy_ref, now)
            .map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn channel_pull(&self, caller: String, channel_id: String, to: String, amount: String, now: u64) -> RpcResult<()> {
        let caller = parse_id(&caller)?;
        let channel_id = parse_id(&channel_id)?;
        let to = parse_id(&to)?;
        let amount = parse_amount(&amount)?;
        self.state.channel.pull(caller, channel_id, to, amount, now).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn channel_pause(&self, caller: String, channel_id: String, now: u64) -> RpcResult<()> {
        let caller = parse_id(&caller)?;
        let channel_id = parse_id(&channel_id)?;
        self.state.channel.pause(caller, channel_id, now).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn channel_resume(&self, caller: String, channel_id: String, now: u64) -> RpcResult<()> {
        let caller = parse_id(&caller)?;
        let channel_id = parse_id(&channel_id)?;
        self.state.channel.resume(caller, channel_id, now).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn channel_revoke(&self, caller: String, channel_id: String, now: u64) -> RpcResult<()> {
        let caller = parse_id(&caller)?;
        let channel_id = parse_id(&channel_id)?;
        self.state.channel.revoke(caller, channel_id, now).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn channel_update_rate(
        &self,
        caller: String,
        channel_id: String,
        new_rate: String,
        new_cap: String,
        now: u64,
    ) -> RpcResult<()> {
        let caller = parse_id(&caller)?;
        let channel_id = parse_id(&channel_id)?;
        let new_rate = parse_amount(&new_rate)?;
        let new_cap = parse_amount(&new_cap)?;
        self.state
            .channel
            .update_rate(caller, channel_id, new_rate, new_cap, now)
            .map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn channel_claimable(&self, channel_id: String, now: u64) -> RpcResult<RpcChannelClaimable> {
        let id = parse_id(&channel_id)?;
        let claimable = self.state.channel.claimable(id, now).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(RpcChannelClaimable {
            channel_id,
            claimable: claimable.to_string(),
        })
    }

    async fn policy_create(
        &self,
        caller: String,
        policy_id: String,
        grantee: String,
        token: String,
        max_per_pull: String,
        max_per_epoch: String,
    ) -> RpcResult<()> {
        let caller = parse_id(&caller)?;
        let policy_id = parse_id(&policy_id)?;
        let grantee = parse_id(&grantee)?;
        let token = parse_id(&token)?;
        let max_per_pull = parse_amount(&max_per_pull)?;
        let max_per_epoch = parse_amount(&max_per_epoch)?;
        self.state
            .policy
            .create_policy(caller, policy_id, grantee, token, max_per_pull, max_per_epoch)
            .map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn policy_set_receiver_allowed(&self, caller: String, policy_id: String, receiver: String, allowed: bool) -> RpcResult<()> {
        let caller = parse_id(&caller)?;
        let policy_id = parse_id(&policy_id)?;
        let receiver = parse_id(&receiver)?;
        self.state
            .policy
            .set_receiver_allowed(caller, policy_id, receiver, allowed)
            .map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn policy_revoke(&self, caller: String, policy_id: String) -> RpcResult<()> {
        let caller = parse_id(&caller)?;
        let policy_id = parse_id(&policy_id)?;
        self.state.policy.revoke_policy(caller, policy_id).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn policy_is_revoked(&self, policy_id: String) -> RpcResult<bool> {
        let policy_id = parse_id(&policy_id)?;
        self.state.policy.is_revoked(policy_id).map_err(|e| rpc_err(-32000, e.to_string()).into())
    }

    async fn intent_verify_and_consume(
        &self,
        caller: String,
        intent: RpcFlowIntent,
        signature: String,
        amount: String,
        now: u64,
    ) -> RpcResult<String> {
        let caller = parse_id(&caller)?;
        let intent = parse_flow_intent(&intent)?;
        let signature = parse_signature(&signature)?;
        let amount = parse_amount(&amount)?;
        let h = self
            .state
            .intent_registry
            .verify_and_consume(caller, &intent, &signature, amount, now, GrantorAccount::KeyHolder)
            .map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(h.to_hex())
    }

    async fn intent_revoke(&self, caller: String, intent_hash: String) -> RpcResult<()> {
        let caller = parse_id(&caller)?;
        let h = parse_intent_hash(&intent_hash)?;
        self.state.intent_registry.revoke_intent(caller, h).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn intent_moved_so_far(&self, intent_hash: String) -> RpcResult<String> {
        let h = parse_intent_hash(&intent_hash)?;
        let moved = self.state.intent_registry.moved_so_far(h).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(moved.to_string())
    }

    async fn intent_owner_of(&self, intent_hash: String) -> RpcResult<Option<String>> {
        let h = parse_intent_hash(&intent_hash)?;
        let owner = self.state.intent_registry.owner_of(h).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(owner.map(|o| o.to_hex()))
    }

    async fn directory_set_domain(
        &self,
        caller: String,
        domain_id: String,
        adapter: String,
        destination: String,
        active: bool,
    ) -> RpcResult<()> {
        let caller = parse_id(&caller)?;
        let domain_id = parse_id(&domain_id)?;
        let adapter = parse_id(&adapter)?;
        let destination = parse_id(&destination)?;
        self.state
            .directory
            .set_domain(caller, domain_id, adapter, destination, active)
            .map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn directory_set_executor_approval(&self, caller: String, domain_id: String, executor: String, approved: bool) -> RpcResult<()> {
        let caller = parse_id(&caller)?;
        let domain_id = parse_id(&domain_id)?;
        let executor = parse_id(&executor)?;
        self.state
            .directory
            .set_executor_approval(caller, domain_id, executor, approved)
            .map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn directory_is_approved_executor(&self, domain_id: String, executor: String) -> RpcResult<bool> {
        let domain_id = parse_id(&domain_id)?;
        let executor = parse_id(&executor)?;
        self.state
            .directory
            .is_approved_executor(domain_id, executor)
            .map_err(|e| rpc_err(-32000, e.to_string()).into())
    }

    async fn rebalancer_execute_flow_intent(
        &self,
        caller: String,
        intent: RpcFlowIntent,
        signature: String,
        amount: String,
        now: u64,
    ) -> RpcResult<String> {
        let caller = parse_id(&caller)?;
        let intent = parse_flow_intent(&intent)?;
        let signature = parse_signature(&signature)?;
        let amount = parse_amount(&amount)?;
        let adapter = self
            .state
            .adapters
            .get(&intent.src_domain)
            .ok_or_else(|| rpc_err(-32000, "no adapter registered for this intent's source domain"))?;
        let h = self
            .state
            .rebalancer
            .execute_flow_intent(caller, &intent, &signature, amount, now, GrantorAccount::KeyHolder, adapter.as_ref())
            .map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(h.to_hex())
    }

    async fn router_register_channel(&self, caller: String, channel_id: String, weight: u64, active: bool) -> RpcResult<()> {
        let caller = parse_id(&caller)?;
        let channel_id = parse_id(&channel_id)?;
        self.state
            .router
            .register_channel(caller, channel_id, weight, active)
            .map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn router_set_active(&self, caller: String, channel_id: String, active: bool) -> RpcResult<()> {
        let caller = parse_id(&caller)?;
        let channel_id = parse_id(&channel_id)?;
        self.state.router.set_active(caller, channel_id, active).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn router_route_step(&self, caller: String, to: String, max_desired: String, now: u64) -> RpcResult<String> {
        let caller = parse_id(&caller)?;
        let to = parse_id(&to)?;
        let max_desired = parse_amount(&max_desired)?;
        let moved = self.state.router.route_step(caller, to, max_desired, now).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(moved.to_string())
    }

    async fn mesh_register_destination(&self, caller: String, destination: String, target_bps: u64, active: bool) -> RpcResult<()> {
        let caller = parse_id(&caller)?;
        let destination = parse_id(&destination)?;
        self.state
            .mesh
            .register_destination(caller, destination, target_bps, active)
            .map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn mesh_report_balances(&self, caller: String, balances: HashMap<String, String>, total: String) -> RpcResult<()> {
        let caller = parse_id(&caller)?;
        let mut parsed = HashMap::with_capacity(balances.len());
        for (k, v) in balances {
            parsed.insert(parse_id(&k)?, parse_amount(&v)?);
        }
        let total = parse_amount(&total)?;
        self.state.mesh.report_balances(caller, parsed, total).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn mesh_rebalance_tick(&self, caller: String, max_step_amount: String, now: u64) -> RpcResult<Option<String>> {
        let caller = parse_id(&caller)?;
        let max_step_amount = parse_amount(&max_step_amount)?;
        let moved = self.state.mesh.rebalance_tick(caller, max_step_amount, now).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(moved.map(|a| a.to_string()))
    }

    async fn get_version(&self) -> RpcResult<RpcVersionInfo> {
        Ok(RpcVersionInfo {
            node_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: "1".to_string(),
            domain_host_id: self.state.domain.host_id.to_hex(),
            domain_verifying_instance: self.state.domain.verifying_instance.to_hex(),
        })
    }

    async fn dev_fund_credit(&self, token: String, owner: String, amount: String) -> RpcResult<()> {
        let token = parse_id(&token)?;
        let owner = parse_id(&owner)?;
        let amount = parse_amount(&amount)?;
        self.state.token.dev_credit(token, owner, amount).map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }

    async fn dev_fund_approve(&self, token: String, owner: String, spender: String, amount: String) -> RpcResult<()> {
        let token = parse_id(&token)?;
        let owner = parse_id(&owner)?;
        let spender = parse_id(&spender)?;
        let amount = parse_amount(&amount)?;
        self.state
            .token
            .dev_approve(token, owner, spender, amount)
            .map_err(|e| rpc_err(-32000, e.to_string()))?;
        Ok(())
    }
}
