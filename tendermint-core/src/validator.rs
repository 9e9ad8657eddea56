// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Default validator set with round-robin proposer rotation.

use tendermint_traits::{Address, Round, Validator, ValidatorSet};

/// A fixed validator list with deterministic round-robin proposer rotation.
///
/// Every correct validator holding the same list computes the same proposer
/// for a given (previous proposer, round) pair.
#[derive(Clone, Debug)]
pub struct RoundRobinValidatorSet {
    validators: Vec<Validator>,
    proposer_index: usize,
}

impl RoundRobinValidatorSet {
    /// Create a set from a non-empty validator list. The list order is the
    /// canonical order; the initial proposer is the first entry.
    pub fn new(validators: Vec<Validator>) -> Self {
        assert!(!validators.is_empty(), "validator set must not be empty");
        Self {
            validators,
            proposer_index: 0,
        }
    }

    fn index_of(&self, address: &Address) -> Option<usize> {
        self.validators.iter().position(|v| v.address == *address)
    }
}

impl ValidatorSet for RoundRobinValidatorSet {
    fn size(&self) -> usize {
        self.validators.len()
    }

    fn list(&self) -> &[Validator] {
        &self.validators
    }

    fn get_by_address(&self, address: &Address) -> Option<(usize, Validator)> {
        self.index_of(address).map(|i| (i, self.validators[i]))
    }

    fn get_proposer(&self) -> Validator {
        self.validators[self.proposer_index]
    }

    fn is_proposer(&self, address: &Address) -> bool {
        self.get_proposer().address == *address
    }

    fn calc_proposer(&mut self, prev_proposer: &Address, round: Round) {
        let round = round.max(0) as u64;
        let seed = match self.index_of(prev_proposer) {
            Some(index) => index as u64 + round + 1,
            None => round,
        };
        self.proposer_index = (seed % self.validators.len() as u64) as usize;
    }

    fn total_voting_power(&self) -> u64 {
        self.validators.iter().map(|v| v.voting_power).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    fn four() -> RoundRobinValidatorSet {
        RoundRobinValidatorSet::new((1..=4).map(|i| Validator::new(addr(i), 1)).collect())
    }

    #[test]
    fn test_initial_proposer_is_first() {
        let set = four();
        assert_eq!(set.get_proposer().address, addr(1));
        assert!(set.is_proposer(&addr(1)));
        assert!(!set.is_proposer(&addr(2)));
    }

    #[test]
    fn test_get_by_address() {
        let set = four();
        let (index, validator) = set.get_by_address(&addr(3)).unwrap();
        assert_eq!(index, 2);
        assert_eq!(validator.address, addr(3));
        assert!(set.get_by_address(&addr(9)).is_none());
    }

    #[test]
    fn test_rotation_is_deterministic() {
        let mut a = four();
        let mut b = four();
        for round in 1..10 {
            a.calc_proposer(&addr(1), round);
            b.calc_proposer(&addr(1), round);
            assert_eq!(a.get_proposer(), b.get_proposer());
        }
    }

    #[test]
    fn test_rotation_advances_per_round() {
        let mut set = four();
        set.calc_proposer(&addr(1), 1);
        let first = set.get_proposer().address;

        let mut set2 = four();
        set2.calc_proposer(&addr(1), 2);
        let second = set2.get_proposer().address;

        assert_ne!(first, second);
    }

    #[test]
    fn test_unknown_prev_proposer_falls_back_to_round() {
        let mut set = four();
        set.calc_proposer(&addr(9), 2);
        assert_eq!(set.get_proposer().address, addr(3));
    }

    #[test]
    fn test_total_voting_power() {
        assert_eq!(four().total_voting_power(), 4);
    }
}
