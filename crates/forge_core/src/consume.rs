//! Consume contracts.
//!
//! Production blocks declare what they draw down as a list of
//! [`Consumer`]s. Each tick the tile scheduler asks the list whether the
//! entity can run ([`Consumers::valid`]) and, if it can, applies the
//! per-tick draws. On-craft draws are applied when a craft cycle finishes.
//!
//! Checking presence (`valid`) and deducting (`update`) are separate steps;
//! a rate-scaled draw is capped by the block's storage capacity, never by
//! what the entity currently holds.

use serde::{Deserialize, Serialize};

use crate::content::{Block, Item, ItemId, ItemStack, Liquid, LiquidId};
use crate::math::Fixed;
use crate::world::TileEntity;

/// Dense bitset over resource ids (up to 256).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContentSet {
    bits: [u64; 4],
}

impl ContentSet {
    /// Empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self { bits: [0; 4] }
    }

    /// Add an id.
    pub fn insert(&mut self, id: u8) {
        self.bits[usize::from(id / 64)] |= 1 << (id % 64);
    }

    /// Whether the id is present.
    #[must_use]
    pub const fn contains(&self, id: u8) -> bool {
        self.bits[(id / 64) as usize] & (1 << (id % 64)) != 0
    }

    /// Number of ids present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Whether no ids are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&word| word == 0)
    }
}

/// Item predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemFilter {
    /// Every item.
    Any,
    /// Items at least this flammable.
    Flammable(Fixed),
    /// Items at least this explosive.
    Explosive(Fixed),
    /// An explicit list.
    OneOf(Vec<ItemId>),
}

impl ItemFilter {
    /// Whether `item` passes.
    #[must_use]
    pub fn test(&self, item: &Item) -> bool {
        match self {
            Self::Any => true,
            Self::Flammable(min) => item.flammability >= *min,
            Self::Explosive(min) => item.explosiveness >= *min,
            Self::OneOf(ids) => ids.contains(&item.id),
        }
    }

    /// Precompute the accepted ids for a catalog.
    #[must_use]
    pub fn accepted(&self, items: &[Item]) -> ContentSet {
        let mut set = ContentSet::new();
        for item in items.iter().filter(|item| self.test(item)) {
            set.insert(item.id.0);
        }
        set
    }
}

/// Liquid predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiquidFilter {
    /// Every liquid.
    Any,
    /// Liquids at least this flammable.
    Flammable(Fixed),
    /// Cool liquids with enough heat capacity.
    Coolant {
        /// Highest accepted temperature.
        max_temperature: Fixed,
        /// Lowest accepted heat capacity.
        min_heat_capacity: Fixed,
    },
    /// An explicit list.
    OneOf(Vec<LiquidId>),
}

impl LiquidFilter {
    /// Whether `liquid` passes.
    #[must_use]
    pub fn test(&self, liquid: &Liquid) -> bool {
        match self {
            Self::Any => true,
            Self::Flammable(min) => liquid.flammability >= *min,
            Self::Coolant {
                max_temperature,
                min_heat_capacity,
            } => liquid.temperature <= *max_temperature && liquid.heat_capacity >= *min_heat_capacity,
            Self::OneOf(ids) => ids.contains(&liquid.id),
        }
    }

    /// Precompute the accepted ids for a catalog.
    #[must_use]
    pub fn accepted(&self, liquids: &[Liquid]) -> ContentSet {
        let mut set = ContentSet::new();
        for liquid in liquids.iter().filter(|liquid| self.test(liquid)) {
            set.insert(liquid.id.0);
        }
        set
    }
}

/// When a consumer's draw is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumeTiming {
    /// Every tick the block runs, scaled by the tick delta.
    PerTick,
    /// Once per completed craft cycle.
    OnCraft,
}

/// A resource requirement of a block.
pub trait Consume {
    /// Whether the entity holds what this tick (or craft) requires.
    fn valid(&self, block: &Block, entity: &TileEntity) -> bool;

    /// Deduct the requirement from the entity's modules.
    fn update(&self, block: &Block, entity: &mut TileEntity);

    /// When the draw is applied.
    fn timing(&self) -> ConsumeTiming;
}

/// Fixed item stacks, consumed per craft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeItems {
    /// Required stacks.
    pub items: Vec<ItemStack>,
}

impl Consume for ConsumeItems {
    fn valid(&self, _block: &Block, entity: &TileEntity) -> bool {
        entity
            .items
            .as_ref()
            .is_some_and(|items| items.has_stacks(&self.items))
    }

    fn update(&self, _block: &Block, entity: &mut TileEntity) {
        if let Some(items) = entity.items.as_mut() {
            for stack in &self.items {
                items.remove_stack(*stack);
            }
        }
    }

    fn timing(&self) -> ConsumeTiming {
        ConsumeTiming::OnCraft
    }
}

/// Any item passing a filter, consumed per craft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeItemFilter {
    /// Predicate as authored.
    pub filter: ItemFilter,
    /// Ids passing the predicate.
    pub accepts: ContentSet,
    /// Units drawn per craft.
    pub amount: i32,
}

impl ConsumeItemFilter {
    fn matching(&self, entity: &TileEntity) -> Option<ItemId> {
        let items = entity.items.as_ref()?;
        items
            .iter()
            .find(|&(item, count)| self.accepts.contains(item.0) && count >= self.amount)
            .map(|(item, _)| item)
    }
}

impl Consume for ConsumeItemFilter {
    fn valid(&self, _block: &Block, entity: &TileEntity) -> bool {
        self.matching(entity).is_some()
    }

    fn update(&self, _block: &Block, entity: &mut TileEntity) {
        if let Some(item) = self.matching(entity) {
            if let Some(items) = entity.items.as_mut() {
                items.remove(item, self.amount);
            }
        }
    }

    fn timing(&self) -> ConsumeTiming {
        ConsumeTiming::OnCraft
    }
}

/// One specific liquid, drawn per tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeLiquid {
    /// Liquid drawn.
    pub liquid: LiquidId,
    /// Units per tick.
    pub amount: Fixed,
}

impl ConsumeLiquid {
    /// Draw for this tick.
    #[must_use]
    pub fn used(&self, block: &Block, entity: &TileEntity) -> Fixed {
        (self.amount * entity.delta()).min(block.liquid_capacity)
    }
}

impl Consume for ConsumeLiquid {
    fn valid(&self, block: &Block, entity: &TileEntity) -> bool {
        entity
            .liquids
            .as_ref()
            .is_some_and(|liquids| liquids.has(self.liquid, self.used(block, entity)))
    }

    fn update(&self, block: &Block, entity: &mut TileEntity) {
        let used = self.used(block, entity);
        if let Some(liquids) = entity.liquids.as_mut() {
            liquids.remove(self.liquid, used);
        }
    }

    fn timing(&self) -> ConsumeTiming {
        ConsumeTiming::PerTick
    }
}

/// Whatever liquid is current, if it passes a filter. Drawn per tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeLiquidFilter {
    /// Predicate as authored.
    pub filter: LiquidFilter,
    /// Ids passing the predicate.
    pub accepts: ContentSet,
    /// Units per tick.
    pub amount: Fixed,
}

impl ConsumeLiquidFilter {
    /// Draw for this tick: `min(amount * delta, liquid_capacity)`.
    #[must_use]
    pub fn used(&self, block: &Block, entity: &TileEntity) -> Fixed {
        (self.amount * entity.delta()).min(block.liquid_capacity)
    }
}

impl Consume for ConsumeLiquidFilter {
    fn valid(&self, block: &Block, entity: &TileEntity) -> bool {
        entity.liquids.as_ref().is_some_and(|liquids| {
            self.accepts.contains(liquids.current().0)
                && liquids.current_amount() >= self.used(block, entity)
        })
    }

    fn update(&self, block: &Block, entity: &mut TileEntity) {
        let used = self.used(block, entity);
        if let Some(liquids) = entity.liquids.as_mut() {
            liquids.remove(liquids.current(), used);
        }
    }

    fn timing(&self) -> ConsumeTiming {
        ConsumeTiming::PerTick
    }
}

/// Buffered power, drawn per tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumePower {
    /// Units per tick.
    pub amount: Fixed,
}

impl ConsumePower {
    /// Draw for this tick: `min(amount * delta, power_capacity)`.
    #[must_use]
    pub fn used(&self, block: &Block, entity: &TileEntity) -> Fixed {
        (self.amount * entity.delta()).min(block.power_capacity)
    }
}

impl Consume for ConsumePower {
    fn valid(&self, block: &Block, entity: &TileEntity) -> bool {
        entity
            .power
            .as_ref()
            .is_some_and(|power| power.has(self.used(block, entity)))
    }

    fn update(&self, block: &Block, entity: &mut TileEntity) {
        let used = self.used(block, entity);
        if let Some(power) = entity.power.as_mut() {
            power.remove(used);
        }
    }

    fn timing(&self) -> ConsumeTiming {
        ConsumeTiming::PerTick
    }
}

/// Consume variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeKind {
    /// Fixed stacks.
    Items(ConsumeItems),
    /// Filtered item.
    ItemFilter(ConsumeItemFilter),
    /// Fixed liquid.
    Liquid(ConsumeLiquid),
    /// Filtered liquid.
    LiquidFilter(ConsumeLiquidFilter),
    /// Power.
    Power(ConsumePower),
}

/// A consume entry on a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumer {
    /// What is drawn.
    pub kind: ConsumeKind,
    /// Boosters: never gate [`Consumers::valid`], only drawn when present.
    pub optional: bool,
}

impl Consumer {
    /// A required consumer.
    #[must_use]
    pub const fn required(kind: ConsumeKind) -> Self {
        Self {
            kind,
            optional: false,
        }
    }

    fn inner(&self) -> &dyn Consume {
        match &self.kind {
            ConsumeKind::Items(c) => c,
            ConsumeKind::ItemFilter(c) => c,
            ConsumeKind::Liquid(c) => c,
            ConsumeKind::LiquidFilter(c) => c,
            ConsumeKind::Power(c) => c,
        }
    }
}

impl Consume for Consumer {
    fn valid(&self, block: &Block, entity: &TileEntity) -> bool {
        self.inner().valid(block, entity)
    }

    fn update(&self, block: &Block, entity: &mut TileEntity) {
        self.inner().update(block, entity);
    }

    fn timing(&self) -> ConsumeTiming {
        self.inner().timing()
    }
}

/// The full consume list of a block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Consumers {
    list: Vec<Consumer>,
}

impl Consumers {
    /// Wrap a list.
    #[must_use]
    pub fn new(list: Vec<Consumer>) -> Self {
        Self { list }
    }

    /// Entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Consumer> {
        self.list.iter()
    }

    /// Whether the block consumes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Whether every required consumer is satisfied.
    #[must_use]
    pub fn valid(&self, block: &Block, entity: &TileEntity) -> bool {
        self.list
            .iter()
            .filter(|consumer| !consumer.optional)
            .all(|consumer| consumer.valid(block, entity))
    }

    /// Whether every consumer with `timing` is satisfied, ignoring optional ones.
    #[must_use]
    pub fn valid_for(&self, timing: ConsumeTiming, block: &Block, entity: &TileEntity) -> bool {
        self.list
            .iter()
            .filter(|consumer| !consumer.optional && consumer.timing() == timing)
            .all(|consumer| consumer.valid(block, entity))
    }

    /// Apply every draw with `timing`. Optional consumers are skipped when
    /// they cannot be satisfied.
    pub fn trigger(&self, timing: ConsumeTiming, block: &Block, entity: &mut TileEntity) {
        for consumer in self.list.iter().filter(|c| c.timing() == timing) {
            if consumer.optional && !consumer.valid(block, entity) {
                continue;
            }
            consumer.update(block, entity);
        }
    }

    /// Whether any consumer of this kind accepts `item`.
    #[must_use]
    pub fn accepts_item(&self, item: ItemId) -> bool {
        self.list.iter().any(|consumer| match &consumer.kind {
            ConsumeKind::Items(c) => c.items.iter().any(|stack| stack.item == item),
            ConsumeKind::ItemFilter(c) => c.accepts.contains(item.0),
            _ => false,
        })
    }
}
