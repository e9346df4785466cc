use anyhow::{bail, Context};

use flowkernel_rpc::{RpcAuthorization, RpcChannelClaimable, RpcFlowIntent, RpcVersionInfo};

/// Simple JSON-RPC 2.0 client used by the wallet to talk to a running
/// node. Uses raw HTTP POST with serde_json rather than the generated
/// jsonrpsee client, to keep the wallet binary lean and dependency-minimal.
pub struct WalletRpcClient {
    url: String,
    client: reqwest::Client,
}

impl WalletRpcClient {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Call a JSON-RPC method and return the `result` field.
    async fn call(&self, method: &str, params: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("connecting to node at {}", self.url))?;

        let json: serde_json::Value = resp.json().await.context("parsing RPC response")?;

        if let Some(err) = json.get("error") {
            bail!("RPC error: {}", err);
        }

        Ok(json["result"].clone())
    }

    pub async fn pull_direct(&self, caller: &str, auth: &RpcAuthorization, amount: &str, now: u64) -> anyhow::Result<String> {
        let result = self
            .call("flowkernel_pullDirect", serde_json::json!([caller, auth, amount, now]))
            .await?;
        result.as_str().map(|s| s.to_string()).context("expected cumulative amount string")
    }

    pub async fn channel_open(
        &self,
        caller: &str,
        channel_id: &str,
        grantee: &str,
        token: &str,
        rate_per_second: &str,
        max_balance: &str,
        policy_ref: Option<&str>,
        now: u64,
    ) -> anyhow::Result<()> {
        self.call(
            "flowkernel_channelOpen",
            serde_json::json!([caller, channel_id, grantee, token, rate_per_second, max_balance, policy_ref, now]),
        )
        .await?;
        Ok(())
    }

    pub async fn channel_pull(&self, caller: &str, channel_id: &str, to: &str, amount: &str, now: u64) -> anyhow::Result<()> {
        self.call("flowkernel_channelPull", serde_json::json!([caller, channel_id, to, amount, now]))
            .await?;
        Ok(())
    }

    pub async fn channel_claimable(&self, channel_id: &str, now: u64) -> anyhow::Result<RpcChannelClaimable> {
        let result = self.call("flowkernel_channelClaimable", serde_json::json!([channel_id, now])).await?;
        serde_json::from_value(result).context("parsing channel claimable response")
    }

    pub async fn intent_verify_and_consume(
        &self,
        caller: &str,
        intent: &RpcFlowIntent,
        signature: &str,
        amount: &str,
        now: u64,
    ) -> anyhow::Result<String> {
        let result = self
            .call(
                "flowkernel_intentVerifyAndConsume",
                serde_json::json!([caller, intent, signature, amount, now]),
            )
            .await?;
        result.as_str().map(|s| s.to_string()).context("expected intent hash string")
    }

    pub async fn rebalancer_execute_flow_intent(
        &self,
        caller: &str,
        intent: &RpcFlowIntent,
        signature: &str,
        amount: &str,
        now: u64,
    ) -> anyhow::Result<String> {
        let result = self
            .call(
                "flowkernel_rebalancerExecuteFlowIntent",
                serde_json::json!([caller, intent, signature, amount, now]),
            )
            .await?;
        result.as_str().map(|s| s.to_string()).context("expected intent hash string")
    }

    pub async fn consent_pulled_total(&self, auth_hash: &str) -> anyhow::Result<String> {
        let result = self.call("flowkernel_consentPulledTotal", serde_json::json!([auth_hash])).await?;
        result.as_str().map(|s| s.to_string()).context("expected amount string")
    }

    pub async fn get_version(&self) -> anyhow::Result<RpcVersionInfo> {
        let result = self.call("flowkernel_getVersion", serde_json::json!([])).await?;
        serde_json::from_value(result).context("parsing version response")
    }

    pub async fn consent_set_trusted_executor(&self, caller: &str, executor: &str, trusted: bool) -> anyhow::Result<()> {
        self.call("flowkernel_consentSetTrustedExecutor", serde_json::json!([caller, executor, trusted])).await?;
        Ok(())
    }
}
