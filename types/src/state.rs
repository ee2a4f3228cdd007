use std::collections::BTreeMap;

use im::OrdMap;
use serde::{Deserialize, Serialize};

use crate::{
    hashing,
    primitives::{Address, Nonce, H256, U256},
};

/// Rewards owed to block producers that are settled outside of account balances.
pub type UnpaidRewards = BTreeMap<Address, U256>;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct Account {
    pub nonce: Nonce,
    pub balance: U256,
}

/// Account ledger. Cloning is cheap because the underlying map is persistent.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct State {
    accounts: OrdMap<Address, Account>,
}

impl State {
    #[must_use]
    pub fn account(&self, address: Address) -> Account {
        self.accounts.get(&address).copied().unwrap_or_default()
    }

    pub fn set_account(&mut self, address: Address, account: Account) {
        if account == Account::default() {
            self.accounts.remove(&address);
        } else {
            self.accounts.insert(address, account);
        }
    }

    #[must_use]
    pub fn root(&self) -> H256 {
        hashing::hash_serialized(&self.accounts)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl FromIterator<(Address, U256)> for State {
    fn from_iter<I: IntoIterator<Item = (Address, U256)>>(allocation: I) -> Self {
        let mut state = Self::default();

        for (address, balance) in allocation {
            state.set_account(address, Account { nonce: 0, balance });
        }

        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_accounts_do_not_affect_root() {
        let alice = Address::repeat_byte(1);
        let bob = Address::repeat_byte(2);

        let mut state = State::from_iter([(alice, U256::from(10))]);
        let root = state.root();

        state.set_account(bob, Account::default());

        assert_eq!(state.root(), root);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn root_does_not_depend_on_insertion_order() {
        let alice = Address::repeat_byte(1);
        let bob = Address::repeat_byte(2);

        let forward = State::from_iter([(alice, U256::one()), (bob, U256::from(2))]);
        let backward = State::from_iter([(bob, U256::from(2)), (alice, U256::one())]);

        assert_eq!(forward.root(), backward.root());
    }

    #[test]
    fn clones_are_independent() {
        let alice = Address::repeat_byte(1);
        let original = State::from_iter([(alice, U256::from(7))]);
        let mut modified = original.clone();

        modified.set_account(
            alice,
            Account {
                nonce: 1,
                balance: U256::from(3),
            },
        );

        assert_eq!(original.account(alice).balance, U256::from(7));
        assert_ne!(original.root(), modified.root());
    }
}
