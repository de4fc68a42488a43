//! Property-based tests for the tile modules and consumers.

use forge_core::consume::{Consume, ConsumeLiquidFilter, Consumers, ContentSet, LiquidFilter};
use forge_core::content::{Block, BlockId, BlockKind, ItemId, LiquidId};
use forge_core::math::Fixed;
use forge_core::modules::{ItemModule, LiquidModule};
use forge_core::team::Team;
use forge_core::world::{TileEntity, TilePos};
use forge_test_utils::determinism::strategies::{
    arb_item, arb_item_ops, arb_liquid_amount, ItemOp,
};
use proptest::prelude::*;

const ITEMS: u8 = 5;
const LIQUIDS: u8 = 2;
const WATER: LiquidId = LiquidId(0);
const OIL: LiquidId = LiquidId(1);

fn apply(module: &mut ItemModule, op: ItemOp) {
    match op {
        ItemOp::Add(item, amount) => module.add(item, amount),
        ItemOp::Remove(item, amount) => {
            module.remove(item, amount);
        }
        ItemOp::Set(item, amount) => module.set(item, amount),
        ItemOp::Take => {
            module.take();
        }
        ItemOp::Clear => module.clear(),
    }
}

fn tank(liquid_capacity: Fixed) -> Block {
    Block {
        id: BlockId(1),
        name: "tank".into(),
        kind: BlockKind::Wall,
        health: 100,
        solid: true,
        item_capacity: 0,
        liquid_capacity,
        power_capacity: Fixed::ZERO,
        consumes: Consumers::default(),
    }
}

fn entity_with(liquids: LiquidModule) -> TileEntity {
    let mut entity = TileEntity::new(TilePos::new(0, 0), Team::DEFAULT, 100);
    entity.liquids = Some(liquids);
    entity.set_delta(Fixed::ONE);
    entity
}

fn water_only(amount: Fixed) -> ConsumeLiquidFilter {
    let mut accepts = ContentSet::new();
    accepts.insert(WATER.0);
    ConsumeLiquidFilter {
        filter: LiquidFilter::OneOf(vec![WATER]),
        accepts,
        amount,
    }
}

// =============================================================================
// Item module
// =============================================================================

mod items {
    use super::*;

    #[test]
    fn test_single_slot_round_trip() {
        let mut module = ItemModule::new(3);
        module.add(ItemId(0), 50);
        assert_eq!(module.get(ItemId(0)), 50);
        assert_eq!(module.total(), 50);

        let mut bytes = Vec::new();
        module.write(&mut bytes).unwrap();
        let restored = ItemModule::read_new(&mut bytes.as_slice(), 3).unwrap();
        assert_eq!(restored.get(ItemId(0)), 50);
        assert_eq!(restored.total(), 50);
    }

    #[test]
    fn test_add_is_not_clamped() {
        let mut module = ItemModule::new(3);
        module.add(ItemId(1), i32::from(u16::MAX));
        assert_eq!(module.get(ItemId(1)), i32::from(u16::MAX));
    }

    proptest! {
        #[test]
        fn prop_total_tracks_counts(ops in arb_item_ops(ITEMS, 64)) {
            let mut module = ItemModule::new(usize::from(ITEMS));
            for op in ops {
                apply(&mut module, op);
                let sum: i32 = (0..ITEMS).map(|id| module.get(ItemId(id))).sum();
                prop_assert_eq!(module.total(), sum);
                prop_assert!(module.verify_total().is_ok());
            }
        }

        #[test]
        fn prop_remove_never_goes_negative(
            item in arb_item(ITEMS),
            present in 0i32..1000,
            amount in any::<i32>(),
        ) {
            let mut module = ItemModule::new(usize::from(ITEMS));
            module.set(item, present);
            let removed = module.remove(item, amount);
            prop_assert!(module.get(item) >= 0);
            prop_assert!((0..=present).contains(&removed));
            prop_assert_eq!(module.get(item), present - removed);
        }

        #[test]
        fn prop_write_read_round_trip(ops in arb_item_ops(ITEMS, 32)) {
            let mut module = ItemModule::new(usize::from(ITEMS));
            for op in ops {
                apply(&mut module, op);
            }
            let mut bytes = Vec::new();
            module.write(&mut bytes).unwrap();

            let restored = ItemModule::read_new(&mut bytes.as_slice(), usize::from(ITEMS)).unwrap();
            for id in 0..ITEMS {
                prop_assert_eq!(restored.get(ItemId(id)), module.get(ItemId(id)));
            }
            prop_assert_eq!(restored.total(), module.total());
            prop_assert_eq!(restored.id(), module.id());
        }
    }
}

// =============================================================================
// Liquid module
// =============================================================================

mod liquids {
    use super::*;

    proptest! {
        #[test]
        fn prop_write_read_round_trip(
            water in arb_liquid_amount(),
            oil in arb_liquid_amount(),
            oil_last in any::<bool>(),
        ) {
            let mut module = LiquidModule::new(usize::from(LIQUIDS));
            if oil_last {
                module.add(WATER, water);
                module.add(OIL, oil);
            } else {
                module.add(OIL, oil);
                module.add(WATER, water);
            }
            let mut bytes = Vec::new();
            module.write(&mut bytes).unwrap();

            let mut restored = LiquidModule::new(usize::from(LIQUIDS));
            restored.read(&mut bytes.as_slice()).unwrap();
            prop_assert_eq!(restored.get(WATER), water);
            prop_assert_eq!(restored.get(OIL), oil);
            prop_assert_eq!(restored.total(), module.total());
            prop_assert_eq!(restored.current(), module.current());
        }

        #[test]
        fn prop_remove_never_goes_negative(
            present in arb_liquid_amount(),
            amount in arb_liquid_amount(),
        ) {
            let mut module = LiquidModule::new(usize::from(LIQUIDS));
            module.add(WATER, present);
            let removed = module.remove(WATER, amount);
            prop_assert!(module.get(WATER) >= Fixed::ZERO);
            prop_assert_eq!(removed, amount.min(present));
            prop_assert!(module.verify_total().is_ok());
        }
    }
}

// =============================================================================
// Liquid filter consumer
// =============================================================================

mod liquid_filter {
    use super::*;

    #[test]
    fn test_draws_rate_scaled_water() {
        let block = tank(Fixed::from_num(30));
        let mut liquids = LiquidModule::new(usize::from(LIQUIDS));
        liquids.add(WATER, Fixed::from_num(20));
        let mut entity = entity_with(liquids);
        let consume = water_only(Fixed::from_num(0.3));

        assert!(consume.valid(&block, &entity));
        consume.update(&block, &mut entity);
        assert_eq!(
            entity.liquids.as_ref().unwrap().get(WATER),
            Fixed::from_num(20) - Fixed::from_num(0.3)
        );
    }

    #[test]
    fn test_draw_is_capped_by_capacity() {
        let block = tank(Fixed::from_num(2));
        let mut liquids = LiquidModule::new(usize::from(LIQUIDS));
        liquids.add(WATER, Fixed::from_num(20));
        let entity = entity_with(liquids);
        let consume = water_only(Fixed::from_num(5));
        assert_eq!(consume.used(&block, &entity), Fixed::from_num(2));
    }

    proptest! {
        /// A rejected current liquid invalidates the consumer however much
        /// accepted liquid is also stored.
        #[test]
        fn prop_rejected_current_liquid_is_invalid(
            water in arb_liquid_amount(),
            oil in arb_liquid_amount(),
            rate in 1i32..100,
        ) {
            let block = tank(Fixed::from_num(1_000_000));
            let mut liquids = LiquidModule::new(usize::from(LIQUIDS));
            liquids.add(WATER, water);
            liquids.add(OIL, oil);
            let entity = entity_with(liquids);
            let consume = water_only(Fixed::from_num(rate) / 100);
            prop_assert!(!consume.valid(&block, &entity));
        }

        #[test]
        fn prop_accepted_current_liquid_is_valid_when_enough(
            water in arb_liquid_amount(),
            rate in 1i32..100,
        ) {
            let block = tank(Fixed::from_num(1_000_000));
            let mut liquids = LiquidModule::new(usize::from(LIQUIDS));
            liquids.add(WATER, water);
            let entity = entity_with(liquids);
            let consume = water_only(Fixed::from_num(rate) / 100);
            prop_assert_eq!(
                consume.valid(&block, &entity),
                water >= consume.used(&block, &entity)
            );
        }
    }
}
