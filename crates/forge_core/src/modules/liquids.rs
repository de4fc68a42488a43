//! Liquid storage module.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use super::{entry_count, read_i32, read_i64, read_u8, write_i32, write_i64, write_u8, ModuleId};
use crate::content::LiquidId;
use crate::error::{GameError, Result};
use crate::math::Fixed;

/// Fixed-point liquid amounts for one tile, indexed by [`LiquidId`].
///
/// Tracks the most recently added liquid as `current`; filtered consumers
/// test and drain only that liquid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidModule {
    #[serde(with = "fixed_vec_serde")]
    liquids: Vec<Fixed>,
    #[serde(with = "crate::math::fixed_serde")]
    total: Fixed,
    current: LiquidId,
    // Process-local; snapshots of equal state must encode identically.
    #[serde(skip, default = "ModuleId::next")]
    id: ModuleId,
}

mod fixed_vec_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::math::Fixed;

    pub fn serialize<S: Serializer>(values: &[Fixed], serializer: S) -> Result<S::Ok, S::Error> {
        values
            .iter()
            .map(|value| value.to_bits())
            .collect::<Vec<_>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Fixed>, D::Error> {
        let bits = Vec::<i64>::deserialize(deserializer)?;
        Ok(bits.into_iter().map(Fixed::from_bits).collect())
    }
}

impl LiquidModule {
    /// Create an empty module with one slot per catalog liquid.
    #[must_use]
    pub fn new(liquid_count: usize) -> Self {
        Self {
            liquids: vec![Fixed::ZERO; liquid_count],
            total: Fixed::ZERO,
            current: LiquidId(0),
            id: ModuleId::next(),
        }
    }

    /// Module identifier.
    #[must_use]
    pub const fn id(&self) -> ModuleId {
        self.id
    }

    /// Sum of all amounts.
    #[must_use]
    pub const fn total(&self) -> Fixed {
        self.total
    }

    /// Most recently added liquid.
    #[must_use]
    pub const fn current(&self) -> LiquidId {
        self.current
    }

    /// Amount of the current liquid.
    #[must_use]
    pub fn current_amount(&self) -> Fixed {
        self.get(self.current)
    }

    /// Amount of one liquid.
    #[must_use]
    pub fn get(&self, liquid: LiquidId) -> Fixed {
        self.liquids[liquid.index()]
    }

    /// Whether at least `amount` of `liquid` is present.
    #[must_use]
    pub fn has(&self, liquid: LiquidId, amount: Fixed) -> bool {
        self.get(liquid) >= amount
    }

    /// Add liquid and make it current. Not clamped to capacity.
    pub fn add(&mut self, liquid: LiquidId, amount: Fixed) {
        self.liquids[liquid.index()] += amount;
        self.total += amount;
        self.current = liquid;
    }

    /// Remove up to `amount` of one liquid. Returns the amount removed.
    pub fn remove(&mut self, liquid: LiquidId, amount: Fixed) -> Fixed {
        let slot = &mut self.liquids[liquid.index()];
        let removed = amount.clamp(Fixed::ZERO, (*slot).max(Fixed::ZERO));
        *slot -= removed;
        self.total -= removed;
        removed
    }

    /// Iterate nonzero entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = (LiquidId, Fixed)> + '_ {
        self.liquids
            .iter()
            .enumerate()
            .filter(|(_, &amount)| amount > Fixed::ZERO)
            .map(|(index, &amount)| (LiquidId::from_index(index), amount))
    }

    /// Check the running total against the per-liquid amounts.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvariantViolation`] if they diverge.
    pub fn verify_total(&self) -> Result<()> {
        let sum = self
            .liquids
            .iter()
            .fold(Fixed::ZERO, |acc, &amount| acc + amount);
        if sum == self.total {
            Ok(())
        } else {
            Err(GameError::InvariantViolation(format!(
                "liquid module {} total {} != sum of amounts {}",
                self.id.0, self.total, sum
            )))
        }
    }

    /// Write the module: shared header, `(u8 id, i64 fixed bits)` entries,
    /// then the current liquid id.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer fails.
    pub fn write(&self, writer: &mut impl Write) -> Result<()> {
        write_i32(writer, self.id.0)?;
        write_u8(writer, entry_count(self.iter().count())?)?;
        for (liquid, amount) in self.iter() {
            write_u8(writer, liquid.0)?;
            write_i64(writer, amount.to_bits())?;
        }
        write_u8(writer, self.current.0)
    }

    /// Replace this module's contents from its binary form.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::Corruption`] on unknown liquid ids, duplicate
    /// or non-positive entries, or truncation. Untouched on error.
    pub fn read(&mut self, reader: &mut impl Read) -> Result<()> {
        let slots = self.liquids.len();
        let id = read_i32(reader)?;
        let count = read_u8(reader)?;

        let mut liquids = vec![Fixed::ZERO; slots];
        let mut total = Fixed::ZERO;
        for _ in 0..count {
            let raw_id = read_u8(reader)?;
            let amount = Fixed::from_bits(read_i64(reader)?);

            let slot = liquids.get_mut(raw_id as usize).ok_or_else(|| {
                GameError::Corruption(format!("liquid id {raw_id} outside catalog of {slots} liquids"))
            })?;
            if *slot != Fixed::ZERO {
                return Err(GameError::Corruption(format!("duplicate liquid id {raw_id}")));
            }
            if amount <= Fixed::ZERO {
                return Err(GameError::Corruption(format!(
                    "liquid id {raw_id} stored with non-positive amount"
                )));
            }
            *slot = amount;
            total += amount;
        }

        let current = read_u8(reader)?;
        if current as usize >= slots.max(1) {
            return Err(GameError::Corruption(format!(
                "current liquid {current} outside catalog of {slots} liquids"
            )));
        }

        self.liquids = liquids;
        self.total = total;
        self.current = LiquidId(current);
        self.id = ModuleId(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WATER: LiquidId = LiquidId(0);
    const OIL: LiquidId = LiquidId(1);

    fn fx(n: f64) -> Fixed {
        Fixed::from_num(n)
    }

    #[test]
    fn test_add_sets_current() {
        let mut module = LiquidModule::new(2);
        module.add(WATER, fx(5.0));
        module.add(OIL, fx(1.0));
        assert_eq!(module.current(), OIL);
        assert_eq!(module.current_amount(), fx(1.0));
        assert_eq!(module.total(), fx(6.0));
    }

    #[test]
    fn test_remove_clamps() {
        let mut module = LiquidModule::new(2);
        module.add(WATER, fx(0.5));
        assert_eq!(module.remove(WATER, fx(2.0)), fx(0.5));
        assert_eq!(module.get(WATER), Fixed::ZERO);
        assert_eq!(module.total(), Fixed::ZERO);
    }

    #[test]
    fn test_roundtrip_preserves_current() {
        let mut module = LiquidModule::new(2);
        module.add(OIL, fx(3.25));
        module.add(WATER, fx(19.7));

        let mut bytes = Vec::new();
        module.write(&mut bytes).unwrap();
        let mut restored = LiquidModule::new(2);
        restored.read(&mut bytes.as_slice()).unwrap();

        assert_eq!(restored, module);
        restored.verify_total().unwrap();
    }

    #[test]
    fn test_unknown_liquid_is_corruption() {
        let mut module = LiquidModule::new(2);
        module.add(WATER, fx(1.0));
        let mut bytes = Vec::new();
        module.write(&mut bytes).unwrap();
        // entry id byte follows the 4-byte id and the count byte
        bytes[5] = 4;

        let mut restored = LiquidModule::new(2);
        assert!(matches!(
            restored.read(&mut bytes.as_slice()),
            Err(GameError::Corruption(_))
        ));
    }
}
