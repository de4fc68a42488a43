//! Lockstep checks for the simulation.
//!
//! Clients replay the server's calls against their own copy of the world,
//! so two simulations built the same way and fed the same ticks must hash
//! the same forever. The helpers here build a simulation several times,
//! drive each copy, and compare [`Simulation::state_hash`] values.
//!
//! Things that have broken lockstep before, and what keeps them out:
//! float math ([`forge_core::math::Fixed`] everywhere), hash map iteration
//! (tiles update in placement order, groups in insertion order) and
//! process-local module ids (skipped in snapshots).

use std::thread;

use forge_core::math::Fixed;
use forge_core::simulation::Simulation;
use tracing::warn;

/// Final state hashes of several runs from the same setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHashes {
    /// One hash per run, in run order.
    pub hashes: Vec<u64>,
    /// Ticks each run advanced.
    pub ticks: u64,
}

impl RunHashes {
    /// Whether every run ended in the same state.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.distinct().len() <= 1
    }

    /// Distinct hashes, ascending.
    #[must_use]
    pub fn distinct(&self) -> Vec<u64> {
        let mut distinct = self.hashes.clone();
        distinct.sort_unstable();
        distinct.dedup();
        distinct
    }

    /// Panic with every hash if the runs disagree.
    ///
    /// # Panics
    ///
    /// Panics if any two runs produced different hashes.
    pub fn assert_deterministic(&self) {
        assert!(
            self.is_deterministic(),
            "{} runs of {} ticks ended in {} different states: {:?}",
            self.hashes.len(),
            self.ticks,
            self.distinct().len(),
            self.hashes
        );
    }
}

/// Advance a simulation by one full-speed tick.
///
/// # Panics
///
/// Panics on a fatal simulation fault.
pub fn step(sim: &mut Simulation) {
    if let Err(err) = sim.update(Fixed::ONE) {
        panic!("tick {} failed: {err}", sim.tick());
    }
}

/// Hash of a simulation's state.
///
/// # Panics
///
/// Panics if the state cannot be serialized.
#[must_use]
pub fn hash(sim: &Simulation) -> u64 {
    sim.state_hash().expect("simulation state serializes")
}

/// Build `runs` fresh states with `setup`, advance each `ticks` times and
/// collect their final hashes.
///
/// Generic over the state so the harness itself can be tested on plain
/// counters; pass [`step`] and [`hash`] for a [`Simulation`].
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> RunHashes
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let hashes = (0..runs)
        .map(|_| {
            let mut state = setup();
            (0..ticks).for_each(|_| step(&mut state));
            hash(&state)
        })
        .collect();
    RunHashes { hashes, ticks }
}

/// Two runs of `ticks` ticks end in the same state.
pub fn verify_simulation_determinism(setup: impl Fn() -> Simulation, ticks: u64) -> bool {
    verify_determinism(2, ticks, setup, step, hash).is_deterministic()
}

/// Like [`verify_determinism`], with each run on its own scoped thread.
///
/// # Panics
///
/// Panics if a run panics.
pub fn run_parallel_simulations<F>(setup: F, runs: usize, ticks: u64) -> RunHashes
where
    F: Fn() -> Simulation + Sync,
{
    let setup = &setup;
    let hashes = thread::scope(|scope| {
        let workers: Vec<_> = (0..runs)
            .map(|_| {
                scope.spawn(move || {
                    let mut sim = setup();
                    (0..ticks).for_each(|_| step(&mut sim));
                    hash(&sim)
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().expect("simulation thread panicked"))
            .collect()
    });
    RunHashes { hashes, ticks }
}

/// Step two copies side by side and report the first tick whose hashes
/// differ; `Some(0)` means the setup itself is not reproducible.
pub fn find_first_divergence(setup: impl Fn() -> Simulation, ticks: u64) -> Option<u64> {
    let (mut left, mut right) = (setup(), setup());
    for tick in 0..=ticks {
        if tick > 0 {
            step(&mut left);
            step(&mut right);
        }
        let (a, b) = (hash(&left), hash(&right));
        if a != b {
            warn!(tick, a, b, "Simulations diverged");
            return Some(tick);
        }
    }
    None
}

/// A client that joins by restoring a snapshot after `ticks` ticks hashes
/// the same as the host and stays in lockstep for another `ticks`.
pub fn verify_snapshot_determinism(setup: impl Fn() -> Simulation, ticks: u64) -> bool {
    let mut host = setup();
    (0..ticks).for_each(|_| step(&mut host));

    let Ok(bytes) = host.snapshot() else {
        return false;
    };
    let mut joined = setup();
    if joined.restore(&bytes).is_err() {
        return false;
    }
    (0..=ticks).all(|tick| {
        if tick > 0 {
            step(&mut host);
            step(&mut joined);
        }
        hash(&host) == hash(&joined)
    })
}

/// Proptest inputs for module and tick-loop properties.
pub mod strategies {
    use forge_core::content::ItemId;
    use forge_core::math::Fixed;
    use proptest::prelude::*;

    /// One mutation of an item module.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ItemOp {
        /// `add(item, amount)`
        Add(ItemId, i32),
        /// `remove(item, amount)`
        Remove(ItemId, i32),
        /// `set(item, amount)`
        Set(ItemId, i32),
        /// `take()`
        Take,
        /// `clear()`
        Clear,
    }

    /// Generate an item id below `item_count`.
    pub fn arb_item(item_count: u8) -> impl Strategy<Value = ItemId> {
        (0..item_count).prop_map(ItemId)
    }

    /// Generate a single item module mutation.
    pub fn arb_item_op(item_count: u8) -> impl Strategy<Value = ItemOp> {
        prop_oneof![
            4 => (arb_item(item_count), 1i32..500).prop_map(|(i, a)| ItemOp::Add(i, a)),
            3 => (arb_item(item_count), 1i32..500).prop_map(|(i, a)| ItemOp::Remove(i, a)),
            2 => (arb_item(item_count), 0i32..500).prop_map(|(i, a)| ItemOp::Set(i, a)),
            1 => Just(ItemOp::Take),
            1 => Just(ItemOp::Clear),
        ]
    }

    /// Generate a sequence of item module mutations.
    pub fn arb_item_ops(item_count: u8, max_len: usize) -> impl Strategy<Value = Vec<ItemOp>> {
        prop::collection::vec(arb_item_op(item_count), 0..max_len)
    }

    /// Generate a tick delta between a quarter and two ticks.
    pub fn arb_delta() -> impl Strategy<Value = Fixed> {
        (1i32..=8).prop_map(|quarters| Fixed::from_num(quarters) / 4)
    }

    /// Generate a sequence of tick deltas.
    pub fn arb_deltas(max_len: usize) -> impl Strategy<Value = Vec<Fixed>> {
        prop::collection::vec(arb_delta(), 1..max_len)
    }

    /// Generate a liquid amount with fractional bits.
    pub fn arb_liquid_amount() -> impl Strategy<Value = Fixed> {
        (1i64..(1i64 << 40)).prop_map(Fixed::from_bits)
    }

    /// Generate a tile position inside a `width` by `height` map.
    pub fn arb_tile(width: u16, height: u16) -> impl Strategy<Value = (u16, u16)> {
        (0..width, 0..height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{battle_sim, campaign_sector, content};
    use forge_core::config::SimConfig;
    use proptest::prelude::*;

    fn playing(config: SimConfig) -> Simulation {
        let mut sim = battle_sim(config);
        sim.set_sector(campaign_sector(&content()));
        sim.play().expect("menu to playing");
        sim
    }

    fn fast_waves() -> SimConfig {
        SimConfig {
            wave_spacing: Fixed::from_num(30),
            ..SimConfig::default()
        }
    }

    #[test]
    fn test_verify_determinism_simple() {
        let result = verify_determinism(3, 10, || 0u64, |s| *s += 1, |s| *s);
        result.assert_deterministic();
        assert_eq!(result.hashes, vec![10, 10, 10]);
    }

    #[test]
    fn test_distinct_hashes() {
        let result = RunHashes {
            hashes: vec![3, 1, 3],
            ticks: 1,
        };
        assert_eq!(result.distinct(), vec![1, 3]);
        assert!(!result.is_deterministic());
    }

    #[test]
    fn test_menu_simulation_determinism() {
        assert!(verify_simulation_determinism(|| battle_sim(SimConfig::default()), 20));
    }

    #[test]
    fn test_battle_determinism() {
        assert!(verify_simulation_determinism(|| playing(fast_waves()), 200));
    }

    #[test]
    fn test_headless_battle_determinism() {
        let config = SimConfig {
            headless: true,
            ..fast_waves()
        };
        assert!(verify_simulation_determinism(move || playing(config.clone()), 200));
    }

    #[test]
    fn test_find_divergence_on_deterministic_sim() {
        assert_eq!(find_first_divergence(|| playing(fast_waves()), 120), None);
    }

    #[test]
    fn test_snapshot_keeps_lockstep() {
        assert!(verify_snapshot_determinism(|| playing(fast_waves()), 90));
    }

    #[test]
    fn test_parallel_battle_simulations() {
        let result = run_parallel_simulations(|| playing(fast_waves()), 4, 150);
        result.assert_deterministic();
        assert_eq!(result.hashes.len(), 4);
    }

    #[test]
    #[should_panic(expected = "ended in 2 different states")]
    fn test_divergence_panics() {
        RunHashes {
            hashes: vec![1, 2],
            ticks: 1,
        }
        .assert_deterministic();
    }

    proptest! {
        /// Any delta sequence produces the same state on two runs.
        #[test]
        fn prop_delta_sequences_are_deterministic(deltas in strategies::arb_deltas(40)) {
            let run = |deltas: &[Fixed]| {
                let mut sim = playing(fast_waves());
                for &delta in deltas {
                    sim.update(delta).expect("tick");
                }
                hash(&sim)
            };
            prop_assert_eq!(run(&deltas), run(&deltas));
        }
    }
}
