//! Host world boundary.
//!
//! The engine never owns health, items or chat. It reads and mutates them
//! through [`World`]. Damage dealt with [`World::deal_damage`] is expected to
//! come back into the engine as a fresh damage event, the way a real host
//! fires its damage callback for every hit; the engine's tags and recursion
//! guard are what keep that loop finite.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use soulbond_types::{
    ActivitySample, DamageCause, EngineEvent, EventOutcome, Notice, PlayerId, Position,
    RitualSite,
};

use crate::config::ReviveConfig;

/// Everything the engine needs from the host.
pub trait World: Send + Sync {
    /// Players currently connected.
    fn online_players(&self) -> Vec<PlayerId>;

    fn is_online(&self, player: &PlayerId) -> bool {
        self.online_players().contains(player)
    }

    fn display_name(&self, player: &PlayerId) -> String;

    fn is_alive(&self, player: &PlayerId) -> bool;

    fn health(&self, player: &PlayerId) -> f32;

    /// Deal damage through the host's normal damage path.
    fn deal_damage(&self, player: &PlayerId, amount: f32, cause: DamageCause);

    /// Put the player in the minimal survival state: low health, defensive
    /// buffs, negative effects cleared.
    fn revive(&self, player: &PlayerId, state: &ReviveConfig);

    fn hunger(&self, player: &PlayerId) -> i32;

    fn set_hunger(&self, player: &PlayerId, value: i32);

    fn has_save_charge(&self, player: &PlayerId) -> bool;

    /// Consume one save-charge. Returns false when there was none left.
    fn consume_save_charge(&self, player: &PlayerId) -> bool;

    /// Whether the player carries the ritual offering.
    fn has_offering(&self, player: &PlayerId) -> bool;

    fn consume_offering(&self, player: &PlayerId) -> bool;

    /// Structural check of a ritual altar.
    fn is_valid_site(&self, site: &RitualSite) -> bool;

    fn play_save_effect(&self, player: &PlayerId);

    fn activity(&self, player: &PlayerId) -> Option<ActivitySample>;

    fn send(&self, player: &PlayerId, notice: &Notice);

    fn broadcast(&self, notice: &Notice);
}

/// Callback the headless world uses to feed events back to an engine.
pub type Dispatcher = Arc<dyn Fn(EngineEvent) -> EventOutcome + Send + Sync>;

/// Default maximum health of a simulated player.
pub const MAX_HEALTH: f32 = 20.0;

/// Default maximum hunger of a simulated player.
pub const MAX_HUNGER: i32 = 20;

/// State of one simulated player.
#[derive(Debug, Clone)]
pub struct SimPlayer {
    pub name: String,
    pub online: bool,
    pub health: f32,
    pub hunger: i32,
    pub save_charges: u32,
    pub offerings: u32,
    pub revived: u32,
    pub activity: ActivitySample,
}

impl SimPlayer {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            online: true,
            health: MAX_HEALTH,
            hunger: MAX_HUNGER,
            save_charges: 0,
            offerings: 0,
            revived: 0,
            activity: ActivitySample::default(),
        }
    }
}

/// A damage application the world performed.
#[derive(Debug, Clone, PartialEq)]
pub struct DamageRecord {
    pub player: PlayerId,
    pub amount: f32,
    pub cause: DamageCause,
    pub cancelled: bool,
}

/// In-memory world for simulations and tests.
///
/// Behaves like a minimal host: damage goes through the attached dispatcher
/// as an [`EngineEvent::Damage`] first, is applied only when allowed, and a
/// player reaching zero health produces an [`EngineEvent::Death`].
pub struct HeadlessWorld {
    players: DashMap<PlayerId, SimPlayer>,

    /// Join order, so enumeration is stable.
    order: RwLock<Vec<PlayerId>>,

    valid_sites: RwLock<HashSet<RitualSite>>,

    dispatcher: RwLock<Option<Dispatcher>>,

    messages: Mutex<Vec<(Option<PlayerId>, Notice)>>,

    damage_log: Mutex<Vec<DamageRecord>>,

    save_effects: Mutex<Vec<PlayerId>>,
}

impl HeadlessWorld {
    pub fn new() -> Self {
        Self {
            players: DashMap::new(),
            order: RwLock::new(Vec::new()),
            valid_sites: RwLock::new(HashSet::new()),
            dispatcher: RwLock::new(None),
            messages: Mutex::new(Vec::new()),
            damage_log: Mutex::new(Vec::new()),
            save_effects: Mutex::new(Vec::new()),
        }
    }

    /// Route damage and deaths through `dispatcher`.
    pub fn attach(&self, dispatcher: Dispatcher) {
        *self.dispatcher.write() = Some(dispatcher);
    }

    pub fn detach(&self) {
        *self.dispatcher.write() = None;
    }

    /// Add an online player at full health.
    pub fn add_player(&self, name: impl Into<String>) -> PlayerId {
        let id = PlayerId::generate();
        self.insert_player(id, name);
        id
    }

    /// Add an online player under a known id.
    pub fn insert_player(&self, id: PlayerId, name: impl Into<String>) {
        self.players.insert(id, SimPlayer::new(name));
        let mut order = self.order.write();
        if !order.contains(&id) {
            order.push(id);
        }
    }

    pub fn set_online(&self, player: &PlayerId, online: bool) {
        if let Some(mut p) = self.players.get_mut(player) {
            p.online = online;
        }
    }

    pub fn set_health(&self, player: &PlayerId, health: f32) {
        if let Some(mut p) = self.players.get_mut(player) {
            p.health = health;
        }
    }

    pub fn give_save_charges(&self, player: &PlayerId, count: u32) {
        if let Some(mut p) = self.players.get_mut(player) {
            p.save_charges += count;
        }
    }

    pub fn give_offerings(&self, player: &PlayerId, count: u32) {
        if let Some(mut p) = self.players.get_mut(player) {
            p.offerings += count;
        }
    }

    pub fn set_activity(&self, player: &PlayerId, sample: ActivitySample) {
        if let Some(mut p) = self.players.get_mut(player) {
            p.activity = sample;
        }
    }

    /// Move the player and add interactions and non-idle ticks.
    pub fn record_activity(
        &self,
        player: &PlayerId,
        position: Position,
        interactions: u64,
        ticks: u64,
    ) {
        if let Some(mut p) = self.players.get_mut(player) {
            p.activity.position = position;
            p.activity.interactions += interactions;
            p.activity.non_idle_ticks += ticks;
        }
    }

    pub fn add_valid_site(&self, site: RitualSite) {
        self.valid_sites.write().insert(site);
    }

    /// Bring a dead player back at full health, as a respawn would.
    pub fn respawn(&self, player: &PlayerId) {
        if let Some(mut p) = self.players.get_mut(player) {
            p.health = MAX_HEALTH;
            p.hunger = MAX_HUNGER;
        }
    }

    /// Kill the player outright, bypassing damage events.
    pub fn kill(&self, player: &PlayerId, cause: DamageCause) -> Option<EventOutcome> {
        if let Some(mut p) = self.players.get_mut(player) {
            p.health = 0.0;
        }
        self.dispatch(EngineEvent::Death {
            player: *player,
            cause,
        })
    }

    pub fn player(&self, player: &PlayerId) -> Option<SimPlayer> {
        self.players.get(player).map(|p| p.clone())
    }

    pub fn save_charges(&self, player: &PlayerId) -> u32 {
        self.players.get(player).map(|p| p.save_charges).unwrap_or(0)
    }

    pub fn messages(&self) -> Vec<(Option<PlayerId>, Notice)> {
        self.messages.lock().clone()
    }

    /// Notices addressed to one player.
    pub fn messages_for(&self, player: &PlayerId) -> Vec<Notice> {
        self.messages
            .lock()
            .iter()
            .filter(|(to, _)| to.as_ref() == Some(player))
            .map(|(_, notice)| notice.clone())
            .collect()
    }

    /// Notices sent to everyone.
    pub fn broadcasts(&self) -> Vec<Notice> {
        self.messages
            .lock()
            .iter()
            .filter(|(to, _)| to.is_none())
            .map(|(_, notice)| notice.clone())
            .collect()
    }

    pub fn damage_log(&self) -> Vec<DamageRecord> {
        self.damage_log.lock().clone()
    }

    /// Applied damage records targeting `player`.
    pub fn damage_taken(&self, player: &PlayerId) -> Vec<DamageRecord> {
        self.damage_log
            .lock()
            .iter()
            .filter(|r| r.player == *player && !r.cancelled)
            .cloned()
            .collect()
    }

    pub fn save_effects(&self) -> Vec<PlayerId> {
        self.save_effects.lock().clone()
    }

    pub fn clear_logs(&self) {
        self.messages.lock().clear();
        self.damage_log.lock().clear();
        self.save_effects.lock().clear();
    }

    fn dispatch(&self, event: EngineEvent) -> Option<EventOutcome> {
        // Clone the handle out so no lock is held while the engine runs.
        let dispatcher = self.dispatcher.read().clone();
        dispatcher.map(|dispatch| dispatch(event))
    }
}

impl Default for HeadlessWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl World for HeadlessWorld {
    fn online_players(&self) -> Vec<PlayerId> {
        self.order
            .read()
            .iter()
            .filter(|id| self.players.get(id).map(|p| p.online).unwrap_or(false))
            .copied()
            .collect()
    }

    fn is_online(&self, player: &PlayerId) -> bool {
        self.players.get(player).map(|p| p.online).unwrap_or(false)
    }

    fn display_name(&self, player: &PlayerId) -> String {
        self.players
            .get(player)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| player.to_string())
    }

    fn is_alive(&self, player: &PlayerId) -> bool {
        self.players.get(player).map(|p| p.health > 0.0).unwrap_or(false)
    }

    fn health(&self, player: &PlayerId) -> f32 {
        self.players.get(player).map(|p| p.health).unwrap_or(0.0)
    }

    fn deal_damage(&self, player: &PlayerId, amount: f32, cause: DamageCause) {
        if !self.is_alive(player) {
            return;
        }

        let outcome = self.dispatch(EngineEvent::Damage {
            player: *player,
            amount,
            cause,
        });
        let cancelled = outcome.map(|o| o.is_cancelled()).unwrap_or(false);

        self.damage_log.lock().push(DamageRecord {
            player: *player,
            amount,
            cause,
            cancelled,
        });
        if cancelled {
            return;
        }

        let died = match self.players.get_mut(player) {
            Some(mut p) if p.health > 0.0 => {
                p.health = (p.health - amount).max(0.0);
                p.health <= 0.0
            }
            _ => false,
        };

        if died {
            self.dispatch(EngineEvent::Death {
                player: *player,
                cause,
            });
        }
    }

    fn revive(&self, player: &PlayerId, state: &ReviveConfig) {
        if let Some(mut p) = self.players.get_mut(player) {
            p.health = state.health;
            p.revived += 1;
        }
    }

    fn hunger(&self, player: &PlayerId) -> i32 {
        self.players.get(player).map(|p| p.hunger).unwrap_or(0)
    }

    fn set_hunger(&self, player: &PlayerId, value: i32) {
        if let Some(mut p) = self.players.get_mut(player) {
            p.hunger = value.clamp(0, MAX_HUNGER);
        }
    }

    fn has_save_charge(&self, player: &PlayerId) -> bool {
        self.players
            .get(player)
            .map(|p| p.save_charges > 0)
            .unwrap_or(false)
    }

    fn consume_save_charge(&self, player: &PlayerId) -> bool {
        match self.players.get_mut(player) {
            Some(mut p) if p.save_charges > 0 => {
                p.save_charges -= 1;
                true
            }
            _ => false,
        }
    }

    fn has_offering(&self, player: &PlayerId) -> bool {
        self.players.get(player).map(|p| p.offerings > 0).unwrap_or(false)
    }

    fn consume_offering(&self, player: &PlayerId) -> bool {
        match self.players.get_mut(player) {
            Some(mut p) if p.offerings > 0 => {
                p.offerings -= 1;
                true
            }
            _ => false,
        }
    }

    fn is_valid_site(&self, site: &RitualSite) -> bool {
        self.valid_sites.read().contains(site)
    }

    fn play_save_effect(&self, player: &PlayerId) {
        self.save_effects.lock().push(*player);
    }

    fn activity(&self, player: &PlayerId) -> Option<ActivitySample> {
        self.players.get(player).map(|p| p.activity)
    }

    fn send(&self, player: &PlayerId, notice: &Notice) {
        self.messages.lock().push((Some(*player), notice.clone()));
    }

    fn broadcast(&self, notice: &Notice) {
        self.messages.lock().push((None, notice.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soulbond_types::Verdict;

    #[test]
    fn test_damage_without_dispatcher_applies() {
        let world = HeadlessWorld::new();
        let id = world.add_player("Alex");
        world.deal_damage(&id, 5.0, DamageCause::Environment);
        assert_eq!(world.health(&id), 15.0);
    }

    #[test]
    fn test_cancelled_damage_is_not_applied() {
        let world = HeadlessWorld::new();
        let id = world.add_player("Alex");
        world.attach(Arc::new(|_| EventOutcome::cancel()));
        world.deal_damage(&id, 5.0, DamageCause::Environment);
        assert_eq!(world.health(&id), MAX_HEALTH);
        assert!(world.damage_log()[0].cancelled);
    }

    #[test]
    fn test_lethal_damage_dispatches_death() {
        let world = HeadlessWorld::new();
        let id = world.add_player("Alex");
        let deaths = Arc::new(Mutex::new(0));
        let seen = deaths.clone();
        world.attach(Arc::new(move |event| {
            if matches!(event, EngineEvent::Death { .. }) {
                *seen.lock() += 1;
            }
            EventOutcome {
                verdict: Verdict::Allow,
                effects: vec![],
            }
        }));
        world.deal_damage(&id, 25.0, DamageCause::Environment);
        assert!(!world.is_alive(&id));
        assert_eq!(*deaths.lock(), 1);

        // dead players take no further damage
        world.deal_damage(&id, 1.0, DamageCause::Environment);
        assert_eq!(world.damage_log().len(), 1);
    }

    #[test]
    fn test_online_players_in_join_order() {
        let world = HeadlessWorld::new();
        let a = world.add_player("A");
        let b = world.add_player("B");
        let c = world.add_player("C");
        world.set_online(&b, false);
        assert_eq!(world.online_players(), vec![a, c]);
    }

    #[test]
    fn test_charges_are_consumed_once() {
        let world = HeadlessWorld::new();
        let id = world.add_player("Alex");
        world.give_save_charges(&id, 1);
        assert!(world.consume_save_charge(&id));
        assert!(!world.consume_save_charge(&id));
        assert!(!world.has_save_charge(&id));
    }
}
