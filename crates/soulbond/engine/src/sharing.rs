//! Damage and hunger sharing between bonded or pooled players.
//!
//! A share holds a guard token for the source for its whole fan-out and one
//! for each target while that target is being mutated. When the mutation
//! re-enters the engine as a new damage event the target is already guarded
//! as a source, so the nested event does not propagate.

use dashmap::DashMap;
use soulbond_types::{DamageCause, Effect, PlayerId};
use tracing::{debug, trace};

use crate::bonds::BondGraph;
use crate::config::{BondConfig, BondMode};
use crate::guard::RecursionGuard;
use crate::world::{World, MAX_HUNGER};

/// Mirrors non-lethal damage and hunger changes.
#[derive(Default)]
pub struct DamageSharer {
    guard: RecursionGuard,
    /// Hunger observed at the previous poll.
    hunger_snapshots: DashMap<PlayerId, i32>,
}

impl DamageSharer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(&self) -> &RecursionGuard {
        &self.guard
    }

    /// Mirror `amount` of damage taken by `source`.
    pub fn share_damage(
        &self,
        world: &dyn World,
        bonds: &BondGraph,
        config: &BondConfig,
        source: PlayerId,
        amount: f32,
    ) -> Vec<Effect> {
        let fraction = match config.mode {
            BondMode::Disabled => return Vec::new(),
            BondMode::Pair => config.pair_share_fraction,
            BondMode::Population => config.pool_share_fraction,
        };
        let shared = amount * fraction;
        if !(shared > 0.0) {
            return Vec::new();
        }

        let Some(_source_token) = self.guard.enter(source) else {
            trace!(player_id = %source, "Source already sharing; not propagating");
            return Vec::new();
        };

        let mut effects = Vec::new();
        for target in self.targets(world, bonds, config.mode, source) {
            let Some(_target_token) = self.guard.enter(target) else {
                continue;
            };
            if !world.is_alive(&target) {
                continue;
            }
            world.deal_damage(&target, shared, DamageCause::Shared { source });
            effects.push(Effect::DamageShared {
                target,
                amount: shared,
            });
        }

        if !effects.is_empty() {
            debug!(
                player_id = %source,
                amount = shared,
                targets = effects.len(),
                "Damage shared"
            );
        }
        effects
    }

    /// Compare every online player's hunger with the last poll and mirror
    /// the differences.
    ///
    /// Deltas are collected for everyone before any are applied, so a value
    /// written to a target in this poll is never read back as that target's
    /// own change.
    pub fn poll_hunger(
        &self,
        world: &dyn World,
        bonds: &BondGraph,
        config: &BondConfig,
    ) -> Vec<Effect> {
        let online = world.online_players();
        let mut deltas = Vec::new();
        for player in &online {
            let current = world.hunger(player);
            if let Some(previous) = self.hunger_snapshots.insert(*player, current) {
                if current != previous {
                    deltas.push((*player, current - previous));
                }
            }
        }

        let fraction = match config.mode {
            BondMode::Disabled => return Vec::new(),
            BondMode::Pair => config.pair_share_fraction,
            BondMode::Population => config.pool_share_fraction,
        };
        if !config.share_hunger {
            return Vec::new();
        }

        let mut effects = Vec::new();
        for (source, delta) in deltas {
            let mirrored = (delta as f32 * fraction).round() as i32;
            if mirrored == 0 {
                continue;
            }
            let Some(_source_token) = self.guard.enter(source) else {
                continue;
            };
            for target in self.targets(world, bonds, config.mode, source) {
                let Some(_target_token) = self.guard.enter(target) else {
                    continue;
                };
                let value = (world.hunger(&target) + mirrored).clamp(0, MAX_HUNGER);
                world.set_hunger(&target, value);
                self.hunger_snapshots.insert(target, value);
                effects.push(Effect::HungerShared {
                    target,
                    delta: mirrored,
                });
            }
        }
        effects
    }

    /// Drop the player's hunger baseline.
    pub fn forget(&self, player: &PlayerId) {
        self.hunger_snapshots.remove(player);
    }

    fn targets(
        &self,
        world: &dyn World,
        bonds: &BondGraph,
        mode: BondMode,
        source: PlayerId,
    ) -> Vec<PlayerId> {
        match mode {
            BondMode::Disabled => Vec::new(),
            BondMode::Pair => bonds
                .partner_of(&source)
                .filter(|partner| world.is_online(partner))
                .into_iter()
                .collect(),
            BondMode::Population => world
                .online_players()
                .into_iter()
                .filter(|p| *p != source)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::world::HeadlessWorld;
    use chrono::Utc;
    use std::sync::Arc;

    fn setup() -> (HeadlessWorld, BondGraph, DamageSharer) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (HeadlessWorld::new(), BondGraph::new(clock), DamageSharer::new())
    }

    #[test]
    fn test_pair_share_applies_fraction() {
        let (world, bonds, sharer) = setup();
        let a = world.add_player("A");
        let b = world.add_player("B");
        bonds.create_link(a, b);
        let config = BondConfig {
            pair_share_fraction: 0.5,
            ..BondConfig::default()
        };

        let effects = sharer.share_damage(&world, &bonds, &config, a, 4.0);

        assert_eq!(effects, vec![Effect::DamageShared { target: b, amount: 2.0 }]);
        assert_eq!(world.player(&b).unwrap().health, 18.0);
        assert!(sharer.guard().is_empty());
    }

    #[test]
    fn test_pair_share_skips_offline_and_dead_partner() {
        let (world, bonds, sharer) = setup();
        let config = BondConfig::default();
        let a = world.add_player("A");
        let b = world.add_player("B");
        bonds.create_link(a, b);

        world.set_online(&b, false);
        assert!(sharer.share_damage(&world, &bonds, &config, a, 3.0).is_empty());

        world.set_online(&b, true);
        world.set_health(&b, 0.0);
        assert!(sharer.share_damage(&world, &bonds, &config, a, 3.0).is_empty());
    }

    #[test]
    fn test_guarded_source_does_not_propagate() {
        let (world, bonds, sharer) = setup();
        let config = BondConfig::default();
        let a = world.add_player("A");
        let b = world.add_player("B");
        bonds.create_link(a, b);

        let _held = sharer.guard().enter(a).unwrap();
        assert!(sharer.share_damage(&world, &bonds, &config, a, 3.0).is_empty());
        assert_eq!(world.player(&b).unwrap().health, 20.0);
    }

    #[test]
    fn test_population_share_reaches_everyone_else() {
        let (world, bonds, sharer) = setup();
        let mut config = BondConfig::default();
        config.mode = BondMode::Population;
        let players: Vec<_> = (0..4).map(|i| world.add_player(format!("P{i}"))).collect();

        let effects = sharer.share_damage(&world, &bonds, &config, players[0], 2.0);

        assert_eq!(effects.len(), 3);
        assert_eq!(world.player(&players[0]).unwrap().health, 20.0);
        for p in &players[1..] {
            assert_eq!(world.player(p).unwrap().health, 18.0);
        }
    }

    #[test]
    fn test_disabled_mode_shares_nothing() {
        let (world, bonds, sharer) = setup();
        let mut config = BondConfig::default();
        config.mode = BondMode::Disabled;
        let a = world.add_player("A");
        let b = world.add_player("B");
        bonds.create_link(a, b);

        assert!(sharer.share_damage(&world, &bonds, &config, a, 2.0).is_empty());
    }

    #[test]
    fn test_hunger_first_poll_only_records() {
        let (world, bonds, sharer) = setup();
        let config = BondConfig::default();
        let a = world.add_player("A");
        let b = world.add_player("B");
        bonds.create_link(a, b);

        assert!(sharer.poll_hunger(&world, &bonds, &config).is_empty());

        world.set_hunger(&a, 17);
        let effects = sharer.poll_hunger(&world, &bonds, &config);
        assert_eq!(effects, vec![Effect::HungerShared { target: b, delta: -3 }]);
        assert_eq!(world.hunger(&b), 17);

        // The mirrored value is the new baseline, not a fresh change.
        assert!(sharer.poll_hunger(&world, &bonds, &config).is_empty());
    }

    #[test]
    fn test_hunger_clamps_at_zero() {
        let (world, bonds, sharer) = setup();
        let config = BondConfig::default();
        let a = world.add_player("A");
        let b = world.add_player("B");
        bonds.create_link(a, b);
        world.set_hunger(&b, 2);
        sharer.poll_hunger(&world, &bonds, &config);

        world.set_hunger(&a, 10);
        sharer.poll_hunger(&world, &bonds, &config);
        assert_eq!(world.hunger(&b), 0);
    }

    #[test]
    fn test_hunger_sharing_can_be_turned_off() {
        let (world, bonds, sharer) = setup();
        let config = BondConfig {
            share_hunger: false,
            ..BondConfig::default()
        };
        let a = world.add_player("A");
        let b = world.add_player("B");
        bonds.create_link(a, b);
        sharer.poll_hunger(&world, &bonds, &config);

        world.set_hunger(&a, 5);
        assert!(sharer.poll_hunger(&world, &bonds, &config).is_empty());
        assert_eq!(world.hunger(&b), 20);
    }
}
