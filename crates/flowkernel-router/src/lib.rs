//! AdaptiveRouter + SettlementMesh (spec §4.7) — weighted channel selection
//! and an underweight-first allocator driving repeated routing steps.
//! Grounded on `chronx_consensus::validator::ValidatorSet`'s stake-ranked
//! selection, generalized from "rank by stake" to "pick greatest weight /
//! greatest deficit, ties to first-registered."

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use flowkernel_channel::FlowChannel;
use flowkernel_core::{Amount, Id, KernelError, KernelResult};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct RouteTarget {
    weight: u64,
    active: bool,
    registration_order: u64,
}

/// Picks the active channel with the greatest weight and pulls its
/// claimable balance toward a destination (spec §4.7). The router acts as
/// the grantee of every channel it routes over: `controller` is passed as
/// `caller` into `FlowChannel::pull`.
pub struct AdaptiveRouter {
    controller: Id,
    channel: Arc<FlowChannel>,
    targets: RwLock<HashMap<Id, RouteTarget>>,
    next_order: RwLock<u64>,
}

impl AdaptiveRouter {
    pub fn new(controller: Id, channel: Arc<FlowChannel>) -> Self {
        Self {
            controller,
            channel,
            targets: RwLock::new(HashMap::new()),
            next_order: RwLock::new(0),
        }
    }

    fn require_controller(&self, caller: Id) -> KernelResult<()> {
        if caller == self.controller {
            Ok(())
        } else {
            Err(KernelError::NotController)
        }
    }

    pub fn register_channel(&self, caller: Id, channel_id: Id, weight: u64, active: bool) -> KernelResult<()> {
        self.require_controller(caller)?;
        let mut order = self.next_order.write().expect("order lock poisoned");
        let registration_order = *order;
        *order += 1;
        self.targets.write().expect("targets lock poisoned").insert(
            channel_id,
            RouteTarget {
                weight,
                active,
                registration_order,
            },
        );
        let event = flowkernel_core::events::ChannelRegistered { channel_id, weight };
        info!(?event, "channel registered");
        Ok(())
    }

    pub fn set_active(&self, caller: Id, channel_id: Id, active: bool) -> KernelResult<()> {
        self.require_controller(caller)?;
        let mut targets = self.targets.write().expect("targets lock poisoned");
        let target = targets
            .get_mut(&channel_id)
            .ok_or(KernelError::UnknownChannel(channel_id))?;
        target.active = active;
        let weight = target.weight;
        let event = flowkernel_core::events::ChannelUpdated {
            channel_id,
            weight,
            active,
        };
        info!(?event, "channel updated");
        Ok(())
    }

    fn select_best(&self) -> Option<Id> {
        let targets = self.targets.read().expect("targets lock poisoned");
        targets
            .iter()
            .filter(|(_, t)| t.active)
            .max_by_key(|(_, t)| (t.weight, std::cmp::Reverse(t.registration_order)))
            .map(|(id, _)| *id)
    }

    /// `route_step` (spec §4.7, controller-only). Always emits `Routed`,
    /// even when the pulled amount is zero.
    pub fn route_step(&self, caller: Id, to: Id, max_desired: Amount, now: u64) -> KernelResult<Amount> {
        self.require_controller(caller)?;

        let best = self.select_best().ok_or(KernelError::NoActiveRoute)?;
        let claimable = self.channel.claimable(best, now)?;
        let amt = claimable.min(max_desired);

        if !amt.is_zero() {
            self.channel.pull(self.controller, best, to, amt, now)?;
        }

        let event = flowkernel_core::events::Routed {
            channel_id: best,
            to,
            amount: amt,
        };
        info!(?event, "route step");
        Ok(amt)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct DestinationTarget {
    target_bps: u64,
    active: bool,
    registration_order: u64,
}

/// Holds reported balances across destinations and repeatedly steers the
/// router toward whichever destination is furthest below its target share
/// (spec §4.7). Mutates no self-state after the external router call.
pub struct SettlementMesh {
    controller: Id,
    router: Arc<AdaptiveRouter>,
    destinations: RwLock<HashMap<Id, DestinationTarget>>,
    balances: RwLock<HashMap<Id, Amount>>,
    total: RwLock<Amount>,
    next_order: RwLock<u64>,
}

impl SettlementMesh {
    pub fn new(controller: Id, router: Arc<AdaptiveRouter>) -> Self {
        Self {
            controller,
            router,
            destinations: RwLock::new(HashMap::new()),
            balances: RwLock::new(HashMap::new()),
            total: RwLock::new(Amount::ZERO),
            next_order: RwLock::new(0),
        }
    }

    fn require_controller(&self, caller: Id) -> KernelResult<()> {
        if caller == self.controller {
            Ok(())
        } else {
            Err(KernelError::NotController)
        }
    }

    pub fn register_destination(&self, caller: Id, dest: Id, target_bps: u64, active: bool) -> KernelResult<()> {
        self.require_controller(caller)?;
        if target_bps > 10_000 {
            return Err(KernelError::BadParameters("target_bps must not exceed 10000".into()));
        }
        let mut order = self.next_order.write().expect("order lock poisoned");
        let registration_order = *order;
        *order += 1;
        self.destinations.write().expect("destinations lock poisoned").insert(
            dest,
            DestinationTarget {
                target_bps,
                active,
                registration_order,
            },
        );
        let event = flowkernel_core::events::DestinationConfigured {
            dest,
            target_bps: target_bps as u32,
            active,
        };
        info!(?event, "destination configured");
        Ok(())
    }

    pub fn report_balances(&self, caller: Id, balances: HashMap<Id, Amount>, total: Amount) -> KernelResult<()> {
        self.require_controller(caller)?;
        for (&dest, &balance) in balances.iter() {
            let event = flowkernel_core::events::BalanceReported { dest, balance, total };
            info!(?event, "balance reported");
        }
        *self.balances.write().expect("balances lock poisoned") = balances;
        *self.total.write().expect("total lock poisoned") = total;
        Ok(())
    }

    fn most_underweight(&self) -> Option<(Id, Amount)> {
        let total = *self.total.read().expect("total lock poisoned");
        if total.is_zero() {
            return None;
        }
        let destinations = self.destinations.read().expect("destinations lock poisoned");
        let balances = self.balances.read().expect("balances lock poisoned");

        destinations
            .iter()
            .filter(|(_, t)| t.active && t.target_bps > 0)
            .filter_map(|(dest, t)| {
                let want = total * Amount::from(t.target_bps) / Amount::from(10_000u64);
                let balance = balances.get(dest).copied().unwrap_or(Amount::ZERO);
                let deficit = want.saturating_sub(balance);
                if deficit.is_zero() {
                    None
                } else {
                    Some((*dest, deficit, t.registration_order))
                }
            })
            .max_by_key(|(_, deficit, order)| (*deficit, std::cmp::Reverse(*order)))
            .map(|(dest, deficit, _)| (dest, deficit))
    }

    /// `rebalance_tick` (spec §4.7, controller-only). Returns `None` if no
    /// destination is currently underweight.
    pub fn rebalance_tick(&self, caller: Id, max_step_amount: Amount, now: u64) -> KernelResult<Option<Amount>> {
        self.require_controller(caller)?;

        let Some((dest, deficit)) = self.most_underweight() else {
            return Ok(None);
        };
        let step = deficit.min(max_step_amount);
        let moved = self.router.route_step(self.controller, dest, step, now)?;

        let event = flowkernel_core::events::MeshStep {
            dest,
            deficit,
            sent: moved,
        };
        info!(?event, "mesh step");
        Ok(Some(moved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowkernel_token::SimpleTokenLedger;

    fn id(b: u8) -> Id {
        Id::from_bytes([b; 32])
    }

    fn setup_channel() -> (Arc<FlowChannel>, Id, Id, Id, Id) {
        let token_ledger = Arc::new(SimpleTokenLedger::new());
        let channel = Arc::new(FlowChannel::new_in_memory(token_ledger.clone(), None));
        let controller = id(1);
        let token = id(2);
        let channel_id = id(3);
        token_ledger.credit(token, controller, Amount::from(10_000u64));
        token_ledger.approve(token, controller, controller, Amount::from(10_000u64));
        channel
            .open(
                controller,
                channel_id,
                controller,
                token,
                Amount::from(10u64),
                Amount::from(1_000u64),
                None,
                0,
            )
            .unwrap();
        (channel, controller, token, channel_id, token_ledger.balance_of(token, controller))
    }

    #[test]
    fn route_step_picks_greatest_weight_and_moves_claimable() {
        let (channel, controller, _token, channel_id, _bal) = setup_channel();
        let router = AdaptiveRouter::new(controller, channel);
        router.register_channel(controller, channel_id, 5, true).unwrap();

        let to = id(9);
        let amt = router.route_step(controller, to, Amount::from(1000u64), 10).unwrap();
        assert_eq!(amt, Amount::from(100u64));
    }

    #[test]
    fn route_step_with_no_active_channel_fails() {
        let (channel, controller, _token, _channel_id, _bal) = setup_channel();
        let router = AdaptiveRouter::new(controller, channel);
        let result = router.route_step(controller, id(9), Amount::from(10u64), 10);
        assert!(matches!(result, Err(KernelError::NoActiveRoute)));
    }

    #[test]
    fn rebalance_tick_picks_most_underweight_destination() {
        let (channel, controller, _token, channel_id, _bal) = setup_channel();
        let router = Arc::new(AdaptiveRouter::new(controller, channel));
        router.register_channel(controller, channel_id, 1, true).unwrap();
        let mesh = SettlementMesh::new(controller, router);

        let d1 = id(20);
        let d2 = id(21);
        mesh.register_destination(controller, d1, 5_000, true).unwrap();
        mesh.register_destination(controller, d2, 5_000, true).unwrap();

        let mut balances = HashMap::new();
        balances.insert(d1, Amount::from(100u64));
        balances.insert(d2, Amount::from(400u64));
        mesh.report_balances(controller, balances, Amount::from(1000u64)).unwrap();

        // want = 500 each; d1 deficit 400, d2 deficit 100 -> d1 picked.
        let moved = mesh.rebalance_tick(controller, Amount::from(1000u64), 10).unwrap();
        assert!(moved.is_some());
    }

    #[test]
    fn rebalance_tick_returns_none_when_no_deficit() {
        let (channel, controller, _token, channel_id, _bal) = setup_channel();
        let router = Arc::new(AdaptiveRouter::new(controller, channel));
        router.register_channel(controller, channel_id, 1, true).unwrap();
        let mesh = SettlementMesh::new(controller, router);

        let d1 = id(20);
        mesh.register_destination(controller, d1, 5_000, true).unwrap();
        let mut balances = HashMap::new();
        balances.insert(d1, Amount::from(1000u64));
        mesh.report_balances(controller, balances, Amount::from(1000u64)).unwrap();

        let moved = mesh.rebalance_tick(controller, Amount::from(1000u64), 10).unwrap();
        assert!(moved.is_none());
    }
}
