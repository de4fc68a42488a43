//! Item inventory module.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use super::{entry_count, read_i32, read_u8, write_i32, write_u8, ModuleId};
use crate::content::{ItemId, ItemStack};
use crate::error::{GameError, Result};

/// Integer item counts for one tile, indexed by [`ItemId`].
///
/// `total` always equals the sum of all counts. It is updated on every
/// mutation and never recomputed by summing.
///
/// # Panics
///
/// Accessors index the table directly. Passing an id outside the catalog
/// the module was sized for is a programming error and panics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemModule {
    items: Vec<i32>,
    total: i32,
    // Process-local; snapshots of equal state must encode identically.
    #[serde(skip, default = "ModuleId::next")]
    id: ModuleId,
}

impl ItemModule {
    /// Create an empty module with one slot per catalog item.
    #[must_use]
    pub fn new(item_count: usize) -> Self {
        Self {
            items: vec![0; item_count],
            total: 0,
            id: ModuleId::next(),
        }
    }

    /// Number of slots (catalog item count).
    #[must_use]
    pub fn slots(&self) -> usize {
        self.items.len()
    }

    /// Module identifier.
    #[must_use]
    pub const fn id(&self) -> ModuleId {
        self.id
    }

    /// Override the module identifier.
    pub fn set_id(&mut self, id: ModuleId) {
        self.id = id;
    }

    /// Sum of all counts.
    #[must_use]
    pub const fn total(&self) -> i32 {
        self.total
    }

    /// Count of one item.
    #[must_use]
    pub fn get(&self, item: ItemId) -> i32 {
        self.items[item.index()]
    }

    /// Whether at least one unit of `item` is present.
    #[must_use]
    pub fn has_any(&self, item: ItemId) -> bool {
        self.get(item) > 0
    }

    /// Whether at least `amount` of `item` is present.
    #[must_use]
    pub fn has(&self, item: ItemId, amount: i32) -> bool {
        self.get(item) >= amount
    }

    /// Whether every stack is fully present.
    #[must_use]
    pub fn has_stacks(&self, stacks: &[ItemStack]) -> bool {
        stacks.iter().all(|stack| self.has(stack.item, stack.amount))
    }

    /// Whether at least one unit of each stack's item is present.
    #[must_use]
    pub fn has_one_of_each(&self, stacks: &[ItemStack]) -> bool {
        stacks.iter().all(|stack| self.has_any(stack.item))
    }

    /// Overwrite the count of one item. Negative amounts store zero.
    pub fn set(&mut self, item: ItemId, amount: i32) {
        let amount = amount.max(0);
        let slot = &mut self.items[item.index()];
        self.total += amount - *slot;
        *slot = amount;
    }

    /// Add to the count of one item.
    ///
    /// Does not clamp to any capacity: the module has no notion of block
    /// capacity, so callers that must respect it check before adding.
    /// A tile may therefore be transiently over capacity (e.g. when an
    /// item transfer lands on a full core). A negative amount never takes
    /// the count below zero.
    pub fn add(&mut self, item: ItemId, amount: i32) {
        let slot = &mut self.items[item.index()];
        let amount = amount.max(-*slot);
        *slot += amount;
        self.total += amount;
    }

    /// Add a whole stack.
    pub fn add_stack(&mut self, stack: ItemStack) {
        self.add(stack.item, stack.amount);
    }

    /// Merge another module's counts into this one.
    ///
    /// # Panics
    ///
    /// Panics if `other` has more slots than this module.
    pub fn add_all(&mut self, other: &ItemModule) {
        assert!(
            other.items.len() <= self.items.len(),
            "merging a module built for a larger catalog"
        );
        for (slot, amount) in self.items.iter_mut().zip(&other.items) {
            *slot += amount;
            self.total += amount;
        }
    }

    /// Remove up to `amount` of one item.
    ///
    /// Clamped to what is present: never drives a count negative.
    /// Returns the amount actually removed.
    pub fn remove(&mut self, item: ItemId, amount: i32) -> i32 {
        let slot = &mut self.items[item.index()];
        let removed = amount.clamp(0, (*slot).max(0));
        *slot -= removed;
        self.total -= removed;
        removed
    }

    /// Remove a whole stack (clamped).
    pub fn remove_stack(&mut self, stack: ItemStack) -> i32 {
        self.remove(stack.item, stack.amount)
    }

    /// Remove one unit of the first present item, if any.
    pub fn take(&mut self) -> Option<ItemId> {
        let index = self.items.iter().position(|&count| count > 0)?;
        self.items[index] -= 1;
        self.total -= 1;
        Some(ItemId::from_index(index))
    }

    /// Remove every item.
    pub fn clear(&mut self) {
        self.items.iter_mut().for_each(|slot| *slot = 0);
        self.total = 0;
    }

    /// Iterate nonzero entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ItemId, i32)> + '_ {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, &count)| count > 0)
            .map(|(index, &count)| (ItemId::from_index(index), count))
    }

    /// Check the running total against the per-item counts.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvariantViolation`] if they diverge.
    pub fn verify_total(&self) -> Result<()> {
        let sum: i32 = self.items.iter().sum();
        if sum == self.total {
            Ok(())
        } else {
            Err(GameError::InvariantViolation(format!(
                "item module {} total {} != sum of counts {}",
                self.id.0, self.total, sum
            )))
        }
    }

    /// Write the module in its binary form.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer fails.
    pub fn write(&self, writer: &mut impl Write) -> Result<()> {
        write_i32(writer, self.id.0)?;
        write_u8(writer, entry_count(self.iter().count())?)?;
        for (item, amount) in self.iter() {
            write_u8(writer, item.0)?;
            write_i32(writer, amount)?;
        }
        Ok(())
    }

    /// Replace this module's contents from its binary form.
    ///
    /// The table is rebuilt from zero and only committed once the whole
    /// record has been read.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::Corruption`] on an unknown item id, a duplicate
    /// or non-positive entry, or a truncated stream. The module is left
    /// untouched on error.
    pub fn read(&mut self, reader: &mut impl Read) -> Result<()> {
        let id = read_i32(reader)?;
        let count = read_u8(reader)?;

        let mut items = vec![0; self.items.len()];
        let mut total = 0i32;
        for _ in 0..count {
            let raw_id = read_u8(reader)?;
            let amount = read_i32(reader)?;

            let slot = items.get_mut(raw_id as usize).ok_or_else(|| {
                GameError::Corruption(format!(
                    "item id {raw_id} outside catalog of {} items",
                    self.items.len()
                ))
            })?;
            if *slot != 0 {
                return Err(GameError::Corruption(format!("duplicate item id {raw_id}")));
            }
            if amount <= 0 {
                return Err(GameError::Corruption(format!(
                    "item id {raw_id} stored with non-positive amount {amount}"
                )));
            }
            *slot = amount;
            total = total.checked_add(amount).ok_or_else(|| {
                GameError::Corruption("item total overflows".into())
            })?;
        }

        self.items = items;
        self.total = total;
        self.id = ModuleId(id);
        Ok(())
    }

    /// Read a fresh module sized for `item_count` items.
    ///
    /// # Errors
    ///
    /// See [`read`](Self::read).
    pub fn read_new(reader: &mut impl Read, item_count: usize) -> Result<Self> {
        let mut module = Self::new(item_count);
        module.read(reader)?;
        Ok(module)
    }
}
