//! Buffered power module.

use serde::{Deserialize, Serialize};

use crate::math::{fixed_serde, Fixed};

/// Power stored in a single tile's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PowerModule {
    /// Stored power.
    #[serde(with = "fixed_serde")]
    pub amount: Fixed,
}

impl PowerModule {
    /// Whether at least `amount` is buffered.
    #[must_use]
    pub fn has(&self, amount: Fixed) -> bool {
        self.amount >= amount
    }

    /// Add power, capped at `capacity`. Returns the amount accepted.
    pub fn charge(&mut self, amount: Fixed, capacity: Fixed) -> Fixed {
        let accepted = amount.min(capacity - self.amount).max(Fixed::ZERO);
        self.amount += accepted;
        accepted
    }

    /// Remove up to `amount`. Returns the amount removed.
    pub fn remove(&mut self, amount: Fixed) -> Fixed {
        let removed = amount.clamp(Fixed::ZERO, self.amount.max(Fixed::ZERO));
        self.amount -= removed;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_caps_and_remove_clamps() {
        let mut power = PowerModule::default();
        let cap = Fixed::from_num(10);
        assert_eq!(power.charge(Fixed::from_num(12), cap), cap);
        assert_eq!(power.remove(Fixed::from_num(15)), cap);
        assert_eq!(power.amount, Fixed::ZERO);
    }
}
