//! flowkernel-rpc
//!
//! JSON-RPC 2.0 server exposing every kernel component over one namespace.
//!
//! Namespace: "flowkernel"
//! Methods (selected):
//!   flowkernel_pullDirect                  — execute one direct Authorization pull
//!   flowkernel_consentIsRevoked/…          — ConsentRegistry queries and mutations
//!   flowkernel_channelOpen/Pull/…          — FlowChannel lifecycle
//!   flowkernel_policyCreate/…              — PolicyEnforcer budgets
//!   flowkernel_intentVerifyAndConsume/…    — IntentRegistry metering
//!   flowkernel_directorySetDomain/…        — DomainDirectory configuration
//!   flowkernel_rebalancerExecuteFlowIntent — cross-domain pull via Rebalancer
//!   flowkernel_routerRouteStep             — AdaptiveRouter single step
//!   flowkernel_meshRebalanceTick           — SettlementMesh single step

pub mod api;
pub mod server;
pub mod types;

pub use server::RpcServer;
pub use server::RpcServerState;
pub use types::{RpcAuthorization, RpcChannelClaimable, RpcFlowIntent, RpcVersionInfo};
