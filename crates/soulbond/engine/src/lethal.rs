//! Lethal-outcome resolution.
//!
//! Decides who a save-charge rescues when damage would kill a player.
//! Population mode is checked first, then pair mode for a bonded player
//! whose partner is online and alive. Anything else is not special and
//! proceeds to ordinary death.

use dashmap::{DashMap, DashSet};
use soulbond_types::{DamageCause, Effect, EventOutcome, Notice, PlayerId, Verdict};
use tracing::{debug, info};

use crate::bonds::BondGraph;
use crate::config::{BondMode, EngineConfig, ReviveConfig};
use crate::world::World;

/// Damage large enough to kill anyone.
pub const LETHAL_DAMAGE: f32 = f32::MAX;

/// Resolves would-be-fatal damage events.
#[derive(Default)]
pub struct LethalResolver {
    /// dying player -> partner who survived on their own charge and must
    /// not be taken by the death pact.
    spared: DashMap<PlayerId, PlayerId>,
    /// Players revived since their mark was last taken.
    revived: DashSet<PlayerId>,
}

impl LethalResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_lethal(world: &dyn World, player: &PlayerId, amount: f32) -> bool {
        amount >= world.health(player)
    }

    /// Resolve a lethal hit on `player`.
    ///
    /// Returns `None` when no bonding rule applies. The outcome's verdict is
    /// for the original damage event.
    pub fn resolve(
        &self,
        world: &dyn World,
        bonds: &BondGraph,
        config: &EngineConfig,
        player: PlayerId,
    ) -> Option<EventOutcome> {
        match config.bond.mode {
            BondMode::Population => Some(self.resolve_population(world, config, player)),
            BondMode::Pair => {
                let partner = bonds
                    .partner_of(&player)
                    .filter(|p| world.is_online(p) && world.is_alive(p))?;
                Some(self.resolve_pair(world, config, player, partner))
            }
            BondMode::Disabled => None,
        }
    }

    /// Whether `survivor` was rescued on their own while `dying` was not.
    ///
    /// Consumes the record.
    pub fn take_spared(&self, dying: &PlayerId, survivor: &PlayerId) -> bool {
        self.spared
            .remove_if(dying, |_, spared| spared == survivor)
            .is_some()
    }

    /// Whether `player` was revived since the last call. Clears the mark.
    pub fn take_revived(&self, player: &PlayerId) -> bool {
        self.revived.remove(player).is_some()
    }

    pub fn is_revived(&self, player: &PlayerId) -> bool {
        self.revived.contains(player)
    }

    /// Drop any spared record for `player` as the dying side.
    pub fn forget(&self, player: &PlayerId) {
        self.spared.remove(player);
    }

    fn resolve_population(
        &self,
        world: &dyn World,
        config: &EngineConfig,
        player: PlayerId,
    ) -> EventOutcome {
        let online = world.online_players();
        let holders: Vec<PlayerId> = online
            .iter()
            .copied()
            .filter(|p| world.has_save_charge(p))
            .collect();

        if config.bond.totem_saves_all {
            let mut outcome = EventOutcome::cancel();
            let consumed: Vec<PlayerId> = holders
                .into_iter()
                .filter(|p| world.consume_save_charge(p))
                .collect();

            if consumed.is_empty() {
                return self.population_death(world, player, &online);
            }

            for holder in &consumed {
                outcome.push(Effect::ChargeConsumed { player: *holder });
            }
            for p in &online {
                self.revive(world, p, &config.revive, &mut outcome);
            }
            let names = consumed.iter().map(|p| world.display_name(p)).collect();
            world.broadcast(&Notice::PopulationSaved { holders: names });
            info!(
                player_id = %player,
                holders = consumed.len(),
                "Population saved by totems"
            );
            return outcome;
        }

        let mut outcome = EventOutcome::allow();
        let mut saved_self = false;
        for p in &online {
            if holders.contains(p) && self.save(world, p, &config.revive, &mut outcome) {
                world.send(p, &Notice::SoulSaved { name: world.display_name(p) });
                saved_self |= *p == player;
            } else if *p != player {
                Self::force_death(world, *p, player, &mut outcome);
            }
        }

        if saved_self {
            outcome.verdict = Verdict::Cancel;
        } else {
            world.broadcast(&Notice::PopulationDeath {
                name: world.display_name(&player),
            });
        }
        debug!(player_id = %player, saved = saved_self, "Population death resolved individually");
        outcome
    }

    fn population_death(
        &self,
        world: &dyn World,
        player: PlayerId,
        online: &[PlayerId],
    ) -> EventOutcome {
        world.broadcast(&Notice::PopulationDeath {
            name: world.display_name(&player),
        });
        info!(player_id = %player, players = online.len(), "Population death");

        let mut outcome = EventOutcome::allow();
        for p in online.iter().filter(|p| **p != player) {
            Self::force_death(world, *p, player, &mut outcome);
        }
        outcome
    }

    fn resolve_pair(
        &self,
        world: &dyn World,
        config: &EngineConfig,
        player: PlayerId,
        partner: PlayerId,
    ) -> EventOutcome {
        let self_holds = world.has_save_charge(&player);
        let partner_holds = world.has_save_charge(&partner);
        let saves_partner = config.bond.totem_saves_partner;
        let mut outcome = EventOutcome::cancel();

        match (self_holds, partner_holds) {
            (true, true) => {
                let self_saved = self.save(world, &player, &config.revive, &mut outcome);
                let partner_saved = self.save(world, &partner, &config.revive, &mut outcome);
                if !self_saved {
                    let mut fallthrough =
                        self.pair_fallthrough(world, player, partner, partner_saved);
                    fallthrough.absorb(outcome);
                    return fallthrough;
                }
                world.send(&player, &Notice::SoulSaved { name: world.display_name(&player) });
                world.send(&partner, &Notice::SoulSaved { name: world.display_name(&partner) });
            }
            (true, false) => {
                if !self.save(world, &player, &config.revive, &mut outcome) {
                    return self.pair_fallthrough(world, player, partner, false);
                }
                if saves_partner {
                    self.revive(world, &partner, &config.revive, &mut outcome);
                    Self::notify_joint(world, player, partner);
                } else {
                    world.send(&player, &Notice::SoulSaved { name: world.display_name(&player) });
                    world.send(
                        &partner,
                        &Notice::PartnerFell {
                            partner: world.display_name(&player),
                        },
                    );
                    Self::force_death(world, partner, player, &mut outcome);
                }
            }
            (false, true) => {
                if !self.save(world, &partner, &config.revive, &mut outcome) {
                    return self.pair_fallthrough(world, player, partner, false);
                }
                if saves_partner {
                    self.revive(world, &player, &config.revive, &mut outcome);
                    Self::notify_joint(world, partner, player);
                } else {
                    world.send(&partner, &Notice::SoulSaved { name: world.display_name(&partner) });
                    self.spared.insert(player, partner);
                    outcome.verdict = Verdict::Allow;
                }
            }
            (false, false) => return self.pair_fallthrough(world, player, partner, false),
        }

        debug!(
            player_id = %player,
            partner_id = %partner,
            verdict = ?outcome.verdict,
            "Pair lethal resolved"
        );
        outcome
    }

    /// Neither charge saved the dying player.
    fn pair_fallthrough(
        &self,
        world: &dyn World,
        player: PlayerId,
        partner: PlayerId,
        partner_saved: bool,
    ) -> EventOutcome {
        if partner_saved {
            self.spared.insert(player, partner);
        } else {
            world.send(
                &player,
                &Notice::PulledTowardVoid {
                    partner: world.display_name(&partner),
                },
            );
            world.send(
                &partner,
                &Notice::PulledTowardVoid {
                    partner: world.display_name(&player),
                },
            );
        }
        EventOutcome::allow()
    }

    fn notify_joint(world: &dyn World, saver: PlayerId, saved: PlayerId) {
        let notice = Notice::JointSave {
            saver: world.display_name(&saver),
            saved: world.display_name(&saved),
        };
        world.send(&saver, &notice);
        world.send(&saved, &notice);
    }

    /// Consume the player's charge and revive them.
    ///
    /// Returns false when the charge was already gone.
    fn save(
        &self,
        world: &dyn World,
        player: &PlayerId,
        revive: &ReviveConfig,
        outcome: &mut EventOutcome,
    ) -> bool {
        if !world.consume_save_charge(player) {
            return false;
        }
        outcome.push(Effect::ChargeConsumed { player: *player });
        self.revive(world, player, revive, outcome);
        true
    }

    fn revive(
        &self,
        world: &dyn World,
        player: &PlayerId,
        revive: &ReviveConfig,
        outcome: &mut EventOutcome,
    ) {
        world.revive(player, revive);
        self.revived.insert(*player);
        outcome.push(Effect::Revived { player: *player });
    }

    fn force_death(world: &dyn World, target: PlayerId, source: PlayerId, outcome: &mut EventOutcome) {
        if !world.is_alive(&target) {
            return;
        }
        world.deal_damage(&target, LETHAL_DAMAGE, DamageCause::DeathPact { source });
        outcome.push(Effect::ForcedDeath {
            player: target,
            source,
        });
    }
}
