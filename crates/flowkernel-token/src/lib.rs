//! The external token ledger contract the kernel consumes (spec §6) and a
//! reference in-memory implementation for tests and the node's demo
//! fixtures. The kernel never takes custody: every balance mutation lives
//! on the other side of this trait.

use std::collections::HashMap;
use std::sync::Mutex;

use flowkernel_core::{Amount, Id, KernelError, KernelResult};

/// Source of truth for balances and allowances, external to the kernel.
///
/// `transfer_from` moves `amount` from `owner` to `recipient` if `caller`
/// holds sufficient allowance from `owner` and `owner`'s balance covers it;
/// it decrements both and fails otherwise (spec §6).
pub trait TokenLedger: Send + Sync {
    fn transfer_from(
        &self,
        token: Id,
        caller: Id,
        owner: Id,
        recipient: Id,
        amount: Amount,
    ) -> KernelResult<()>;

    fn balance_of(&self, token: Id, owner: Id) -> Amount;

    fn allowance(&self, token: Id, owner: Id, spender: Id) -> Amount;

    /// Directly credit `owner`'s balance, bypassing `transfer_from`. A real,
    /// custodial ledger must reject this (the kernel never takes custody,
    /// so it must never be able to mint funds out of band either); reference
    /// and test ledgers override it so local development and integration
    /// tests can fund accounts without a live custodian attached.
    fn dev_credit(&self, _token: Id, _owner: Id, _amount: Amount) -> KernelResult<()> {
        Err(KernelError::DevFundingUnsupported)
    }

    /// Directly set an allowance, bypassing the owner's own signed consent.
    /// Same custody caveat as `dev_credit`.
    fn dev_approve(&self, _token: Id, _owner: Id, _spender: Id, _amount: Amount) -> KernelResult<()> {
        Err(KernelError::DevFundingUnsupported)
    }
}

#[derive(Default)]
struct Ledgers {
    balances: HashMap<(Id, Id), Amount>,
    allowances: HashMap<(Id, Id, Id), Amount>,
}

/// In-memory reference `TokenLedger`, for tests and `flowkernel-node`'s
/// demo fixtures. Not suitable as the production ledger: a real deployment
/// backs this trait with its own persistent, authenticated balance store.
#[derive(Default)]
pub struct SimpleTokenLedger {
    inner: Mutex<Ledgers>,
}

impl SimpleTokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/fixture helper: mint `amount` of `token` directly into
    /// `owner`'s balance.
    pub fn credit(&self, token: Id, owner: Id, amount: Amount) {
        let mut g = self.inner.lock().expect("token ledger lock poisoned");
        let entry = g.balances.entry((token, owner)).or_insert(Amount::ZERO);
        *entry += amount;
    }

    /// Test/fixture helper: grant `spender` an allowance over `owner`'s
    /// balance of `token`.
    pub fn approve(&self, token: Id, owner: Id, spender: Id, amount: Amount) {
        let mut g = self.inner.lock().expect("token ledger lock poisoned");
        g.allowances.insert((token, owner, spender), amount);
    }
}

impl TokenLedger for SimpleTokenLedger {
    fn transfer_from(
        &self,
        token: Id,
        caller: Id,
        owner: Id,
        recipient: Id,
        amount: Amount,
    ) -> KernelResult<()> {
        let mut g = self.inner.lock().expect("token ledger lock poisoned");

        let allowance = g
            .allowances
            .get(&(token, owner, caller))
            .copied()
            .unwrap_or(Amount::ZERO);
        if allowance < amount {
            return Err(KernelError::TransferFail);
        }

        let balance = g
            .balances
            .get(&(token, owner))
            .copied()
            .unwrap_or(Amount::ZERO);
        if balance < amount {
            return Err(KernelError::TransferFail);
        }

        g.allowances
            .insert((token, owner, caller), allowance - amount);
        g.balances.insert((token, owner), balance - amount);
        let recipient_balance = g
            .balances
            .get(&(token, recipient))
            .copied()
            .unwrap_or(Amount::ZERO);
        g.balances
            .insert((token, recipient), recipient_balance + amount);

        Ok(())
    }

    fn balance_of(&self, token: Id, owner: Id) -> Amount {
        let g = self.inner.lock().expect("token ledger lock poisoned");
        g.balances.get(&(token, owner)).copied().unwrap_or(Amount::ZERO)
    }

    fn allowance(&self, token: Id, owner: Id, spender: Id) -> Amount {
        let g = self.inner.lock().expect("token ledger lock poisoned");
        g.allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or(Amount::ZERO)
    }

    fn dev_credit(&self, token: Id, owner: Id, amount: Amount) -> KernelResult<()> {
        self.credit(token, owner, amount);
        Ok(())
    }

    fn dev_approve(&self, token: Id, owner: Id, spender: Id, amount: Amount) -> KernelResult<()> {
        self.approve(token, owner, spender, amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> Id {
        Id::from_bytes([b; 32])
    }

    #[test]
    fn transfer_moves_balance_and_decrements_allowance() {
        let ledger = SimpleTokenLedger::new();
        let token = id(1);
        let owner = id(2);
        let spender = id(3);
        let recipient = id(4);

        ledger.credit(token, owner, Amount::from(100u64));
        ledger.approve(token, owner, spender, Amount::from(100u64));

        ledger
            .transfer_from(token, spender, owner, recipient, Amount::from(40u64))
            .unwrap();

        assert_eq!(ledger.balance_of(token, owner), Amount::from(60u64));
        assert_eq!(ledger.balance_of(token, recipient), Amount::from(40u64));
        assert_eq!(ledger.allowance(token, owner, spender), Amount::from(60u64));
    }

    #[test]
    fn transfer_fails_without_sufficient_allowance() {
        let ledger = SimpleTokenLedger::new();
        let token = id(1);
        let owner = id(2);
        let spender = id(3);
        let recipient = id(4);

        ledger.credit(token, owner, Amount::from(100u64));
        ledger.approve(token, owner, spender, Amount::from(10u64));

        let result = ledger.transfer_from(token, spender, owner, recipient, Amount::from(40u64));
        assert!(matches!(result, Err(KernelError::TransferFail)));
        assert_eq!(ledger.balance_of(token, owner), Amount::from(100u64));
    }

    #[test]
    fn transfer_fails_without_sufficient_balance() {
        let ledger = SimpleTokenLedger::new();
        let token = id(1);
        let owner = id(2);
        let spender = id(3);
        let recipient = id(4);

        ledger.approve(token, owner, spender, Amount::from(1_000u64));

        let result = ledger.transfer_from(token, spender, owner, recipient, Amount::from(40u64));
        assert!(matches!(result, Err(KernelError::TransferFail)));
    }
}
