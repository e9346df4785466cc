//! FlowChannel (spec §4.4) — continuous accrual state bridging a grantor
//! and a grantee for one token at one rate. Every state-affecting
//! operation synchronizes `accrued` to `now` first; `pull` is additionally
//! guarded by a non-reentrant latch.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

use flowkernel_core::{Amount, Id, KernelError, KernelResult, Timestamp};
use flowkernel_policy::PolicyEnforcer;
use flowkernel_storage::{Database, Store};
use flowkernel_token::TokenLedger;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ChannelEntry {
    grantor: Id,
    grantee: Id,
    token: Id,
    rate_per_second: Amount,
    max_balance: Amount,
    accrued: Amount,
    last_update: Timestamp,
    paused: bool,
    revoked: bool,
    policy_ref: Option<Id>,
}

impl ChannelEntry {
    /// Sync (spec §4.4): advance `accrued` to `now`, or just move the
    /// baseline forward with no accrual while paused or revoked.
    fn sync(&mut self, now: Timestamp) {
        let dt = now.saturating_sub(self.last_update);
        if dt == 0 {
            return;
        }
        if self.revoked || self.paused {
            self.last_update = now;
            return;
        }
        let earned = self.rate_per_second * Amount::from(dt);
        self.accrued = (self.accrued + earned).min(self.max_balance);
        self.last_update = now;
    }
}

pub struct FlowChannel {
    channels: Store<Id, ChannelEntry>,
    token: std::sync::Arc<dyn TokenLedger>,
    policy: Option<std::sync::Arc<PolicyEnforcer>>,
    latch: Mutex<()>,
}

impl FlowChannel {
    pub fn open_database(
        db: &Database,
        token: std::sync::Arc<dyn TokenLedger>,
        policy: Option<std::sync::Arc<PolicyEnforcer>>,
    ) -> KernelResult<Self> {
        Ok(Self {
            channels: db.open_tree("channels")?,
            token,
            policy,
            latch: Mutex::new(()),
        })
    }

    pub fn new_in_memory(
        token: std::sync::Arc<dyn TokenLedger>,
        policy: Option<std::sync::Arc<PolicyEnforcer>>,
    ) -> Self {
        let db = Database::in_memory().expect("in-memory sled open is infallible");
        Self::open_database(&db, token, policy).expect("opening a tree on a fresh db is infallible")
    }

    pub fn open(
        &self,
        caller: Id,
        channel_id: Id,
        grantee: Id,
        token: Id,
        rate_per_second: Amount,
        max_balance: Amount,
        policy_ref: Option<Id>,
        now: Timestamp,
    ) -> KernelResult<()> {
        if grantee.is_zero() || token.is_zero() {
            return Err(KernelError::BadAddress);
        }
        if rate_per_second.is_zero() || max_balance.is_zero() {
            return Err(KernelError::BadParameters(
                "rate_per_second and max_balance must be > 0".into(),
            ));
        }
        let _guard = self.latch.lock().expect("channel latch poisoned");
        if self.channels.contains(&channel_id) {
            return Err(KernelError::ChannelExists(channel_id));
        }
        let entry = ChannelEntry {
            grantor: caller,
            grantee,
            token,
            rate_per_second,
            max_balance,
            accrued: Amount::ZERO,
            last_update: now,
            paused: false,
            revoked: false,
            policy_ref,
        };
        self.channels.put(&channel_id, &entry)?;
        let event = flowkernel_core::events::ChannelOpened {
            channel_id,
            grantor: caller,
            grantee,
            token,
            rate_per_second,
            max_balance,
        };
        info!(?event, "channel opened");
        Ok(())
    }

    fn load(&self, channel_id: Id) -> KernelResult<ChannelEntry> {
        self.channels
            .get(&channel_id)?
            .ok_or(KernelError::UnknownChannel(channel_id))
    }

    pub fn accrue(&self, channel_id: Id, now: Timestamp) -> KernelResult<Amount> {
        let _guard = self.latch.lock().expect("channel latch poisoned");
        let mut entry = self.load(channel_id)?;
        entry.sync(now);
        let accrued = entry.accrued;
        self.channels.put(&channel_id, &entry)?;
        Ok(accrued)
    }

    /// `pull` (spec §4.4): non-reentrant via `latch`, policy check before
    /// the accrued deduction, deduction before the external transfer.
    pub fn pull(&self, caller: Id, channel_id: Id, to: Id, amount: Amount, now: Timestamp) -> KernelResult<()> {
        let _guard = self.latch.lock().expect("channel latch poisoned");

        let mut entry = self.load(channel_id)?;
        if caller != entry.grantee {
            return Err(KernelError::NotGrantee);
        }
        if entry.revoked {
            return Err(KernelError::ChannelRevoked(channel_id));
        }
        if entry.paused {
            return Err(KernelError::Paused(channel_id));
        }
        if to.is_zero() {
            return Err(KernelError::BadAddress);
        }

        entry.sync(now);
        if amount.is_zero() {
            return Err(KernelError::AmountZero);
        }
        if amount > entry.accrued {
            return Err(KernelError::ExceedsAccrued {
                requested: amount,
                accrued: entry.accrued,
            });
        }

        if let Some(policy_id) = entry.policy_ref {
            let policy = self
                .policy
                .as_ref()
                .expect("policy_ref set without a configured PolicyEnforcer");
            policy.check_and_consume(policy_id, caller, to, amount, now)?;
        }

        entry.accrued -= amount;
        self.channels.put(&channel_id, &entry)?;

        self.token
            .transfer_from(entry.token, caller, entry.grantor, to, amount)
            .map_err(|_| KernelError::TransferFail)?;

        let event = flowkernel_core::events::Pulled { id: channel_id, to, amount };
        info!(?event, "channel pull");
        Ok(())
    }

    fn require_grantor(&self, entry: &ChannelEntry, caller: Id) -> KernelResult<()> {
        if caller == entry.grantor {
            Ok(())
        } else {
            Err(KernelError::NotGrantor)
        }
    }

    pub fn pause(&self, caller: Id, channel_id: Id, now: Timestamp) -> KernelResult<()> {
        let _guard = self.latch.lock().expect("channel latch poisoned");
        let mut entry = self.load(channel_id)?;
        self.require_grantor(&entry, caller)?;
        entry.sync(now);
        entry.paused = true;
        self.channels.put(&channel_id, &entry)?;
        info!(event = ?flowkernel_core::events::ChannelPaused { channel_id }, "channel paused");
        Ok(())
    }

    pub fn resume(&self, caller: Id, channel_id: Id, now: Timestamp) -> KernelResult<()> {
        let _guard = self.latch.lock().expect("channel latch poisoned");
        let mut entry = self.load(channel_id)?;
        self.require_grantor(&entry, caller)?;
        if entry.revoked {
            return Err(KernelError::ChannelRevoked(channel_id));
        }
        entry.sync(now);
        entry.paused = false;
        entry.last_update = now;
        self.channels.put(&channel_id, &entry)?;
        info!(event = ?flowkernel_core::events::ChannelResumed { channel_id }, "channel resumed");
        Ok(())
    }

    pub fn revoke(&self, caller: Id, channel_id: Id, now: Timestamp) -> KernelResult<()> {
        let _guard = self.latch.lock().expect("channel latch poisoned");
        let mut entry = self.load(channel_id)?;
        self.require_grantor(&entry, caller)?;
        entry.sync(now);
        entry.revoked = true;
        self.channels.put(&channel_id, &entry)?;
        info!(event = ?flowkernel_core::events::ChannelRevoked { channel_id }, "channel revoked");
        Ok(())
    }

    pub fn update_rate(
        &self,
        caller: Id,
        channel_id: Id,
        new_rate: Amount,
        new_cap: Amount,
        now: Timestamp,
    ) -> KernelResult<()> {
        if new_rate.is_zero() || new_cap.is_zero() {
            return Err(KernelError::BadParameters("new_rate and new_cap must be > 0".into()));
        }
        let _guard = self.latch.lock().expect("channel latch poisoned");
        let mut entry = self.load(channel_id)?;
        self.require_grantor(&entry, caller)?;
        entry.sync(now);
        let old_rate = entry.rate_per_second;
        let old_cap = entry.max_balance;
        entry.rate_per_second = new_rate;
        entry.max_balance = new_cap;
        self.channels.put(&channel_id, &entry)?;
        let event = flowkernel_core::events::ChannelRateUpdated {
            id: channel_id,
            old_rate,
            old_cap,
            new_rate,
            new_cap,
        };
        info!(?event, "channel rate updated");
        Ok(())
    }

    /// Pure projection, never mutates (spec §4.4).
    pub fn claimable(&self, channel_id: Id, now: Timestamp) -> KernelResult<Amount> {
        let entry = self.load(channel_id)?;
        if entry.paused || entry.revoked {
            return Ok(entry.accrued);
        }
        let dt = now.saturating_sub(entry.last_update);
        let projected = entry.accrued + entry.rate_per_second * Amount::from(dt);
        Ok(projected.min(entry.max_balance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowkernel_token::SimpleTokenLedger;
    use std::sync::Arc;

    fn id(b: u8) -> Id {
        Id::from_bytes([b; 32])
    }

    fn setup() -> (FlowChannel, Arc<SimpleTokenLedger>, Id, Id, Id, Id) {
        let token_ledger = Arc::new(SimpleTokenLedger::new());
        let channel = FlowChannel::new_in_memory(token_ledger.clone(), None);
        let grantor = id(1);
        let grantee = id(2);
        let token = id(3);
        let channel_id = id(4);
        token_ledger.credit(token, grantor, Amount::from(10_000u64));
        token_ledger.approve(token, grantor, grantee, Amount::from(10_000u64));
        (channel, token_ledger, grantor, grantee, token, channel_id)
    }

    #[test]
    fn scenario_s2_channel_drip() {
        let (channel, token_ledger, grantor, grantee, token, channel_id) = setup();
        channel
            .open(grantor, channel_id, grantee, token, Amount::from(2u64), Amount::from(1000u64), None, 0)
            .unwrap();

        assert_eq!(channel.claimable(channel_id, 0).unwrap(), Amount::ZERO);
        assert_eq!(channel.claimable(channel_id, 10).unwrap(), Amount::from(20u64));

        let receiver = id(9);
        channel.pull(grantee, channel_id, receiver, Amount::from(15u64), 10).unwrap();
        assert_eq!(token_ledger.balance_of(token, grantor), Amount::from(10_000u64 - 15));
        assert_eq!(channel.claimable(channel_id, 10).unwrap(), Amount::from(5u64));

        channel.pause(grantor, channel_id, 10).unwrap();
        assert_eq!(channel.claimable(channel_id, 100).unwrap(), Amount::from(5u64));

        channel.resume(grantor, channel_id, 100).unwrap();
        assert_eq!(channel.claimable(channel_id, 110).unwrap(), Amount::from(25u64));

        channel.revoke(grantor, channel_id, 110).unwrap();
        let result = channel.pull(grantee, channel_id, receiver, Amount::from(1u64), 120);
        assert!(matches!(result, Err(KernelError::ChannelRevoked(_))));
    }

    #[test]
    fn pull_requires_grantee_caller() {
        let (channel, _token_ledger, grantor, grantee, token, channel_id) = setup();
        channel
            .open(grantor, channel_id, grantee, token, Amount::from(1u64), Amount::from(100u64), None, 0)
            .unwrap();
        let impostor = id(42);
        let result = channel.pull(impostor, channel_id, id(9), Amount::from(1u64), 10);
        assert!(matches!(result, Err(KernelError::NotGrantee)));
    }

    #[test]
    fn pull_exceeding_accrued_fails() {
        let (channel, _token_ledger, grantor, grantee, token, channel_id) = setup();
        channel
            .open(grantor, channel_id, grantee, token, Amount::from(1u64), Amount::from(100u64), None, 0)
            .unwrap();
        let result = channel.pull(grantee, channel_id, id(9), Amount::from(50u64), 5);
        assert!(matches!(result, Err(KernelError::ExceedsAccrued { .. })));
    }

    #[test]
    fn open_rejects_duplicate_channel_id() {
        let (channel, _token_ledger, grantor, grantee, token, channel_id) = setup();
        channel
            .open(grantor, channel_id, grantee, token, Amount::from(1u64), Amount::from(100u64), None, 0)
            .unwrap();
        let result = channel.open(grantor, channel_id, grantee, token, Amount::from(1u64), Amount::from(100u64), None, 0);
        assert!(matches!(result, Err(KernelError::ChannelExists(_))));
    }

    #[test]
    fn update_rate_requires_positive_values() {
        let (channel, _token_ledger, grantor, grantee, token, channel_id) = setup();
        channel
            .open(grantor, channel_id, grantee, token, Amount::from(1u64), Amount::from(100u64), None, 0)
            .unwrap();
        let result = channel.update_rate(grantor, channel_id, Amount::ZERO, Amount::from(10u64), 5);
        assert!(matches!(result, Err(KernelError::BadParameters(_))));
    }

    #[test]
    fn policy_gated_pull_enforces_epoch_budget() {
        let clock = flowkernel_clock::UniversalClock::new(60, 0);
        let policy = Arc::new(PolicyEnforcer::new_in_memory(clock));
        let token_ledger = Arc::new(SimpleTokenLedger::new());
        let channel = FlowChannel::new_in_memory(token_ledger.clone(), Some(policy.clone()));

        let grantor = id(1);
        let grantee = id(2);
        let token = id(3);
        let channel_id = id(4);
        let policy_id = id(5);
        let receiver = id(9);

        token_ledger.credit(token, grantor, Amount::from(10_000u64));
        token_ledger.approve(token, grantor, grantee, Amount::from(10_000u64));
        policy
            .create_policy(grantor, policy_id, grantee, token, Amount::from(50u64), Amount::from(60u64))
            .unwrap();

        channel
            .open(
                grantor,
                channel_id,
                grantee,
                token,
                Amount::from(100u64),
                Amount::from(10_000u64),
                Some(policy_id),
                0,
            )
            .unwrap();

        channel.pull(grantee, channel_id, receiver, Amount::from(50u64), 1).unwrap();
        let result = channel.pull(grantee, channel_id, receiver, Amount::from(20u64), 1);
        assert!(matches!(result, Err(KernelError::ExceedsEpoch { .. })));
    }
}
