//! Shared harness: an engine wired to a headless world on a manual clock.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use soulbond_engine::{Engine, EngineConfig, HeadlessWorld, ManualClock, World};
use soulbond_types::{DamageCause, PlayerId};

pub struct Harness {
    pub engine: Arc<Engine>,
    pub world: Arc<HeadlessWorld>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        let world = Arc::new(HeadlessWorld::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = Arc::new(Engine::with_clock(config, world.clone(), clock.clone()));
        world.attach(engine.dispatcher());
        Self {
            engine,
            world,
            clock,
        }
    }

    /// Players added straight to the world, without join handling.
    pub fn players(&self, names: &[&str]) -> Vec<PlayerId> {
        names.iter().map(|name| self.world.add_player(*name)).collect()
    }

    /// Two players bonded to each other.
    pub fn bonded_pair(&self) -> (PlayerId, PlayerId) {
        let a = self.world.add_player("Alex");
        let b = self.world.add_player("Blair");
        self.engine.set_link(a, b);
        (a, b)
    }

    pub fn hit(&self, player: &PlayerId, amount: f32) {
        self.world.deal_damage(player, amount, DamageCause::Environment);
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(Duration::minutes(minutes));
    }

    pub fn alive(&self, player: &PlayerId) -> bool {
        self.world.player(player).map(|p| p.health > 0.0).unwrap_or(false)
    }

    /// Applied damage records on `player` with the given cause predicate.
    pub fn hits_matching(&self, player: &PlayerId, pred: impl Fn(&DamageCause) -> bool) -> usize {
        self.world
            .damage_taken(player)
            .iter()
            .filter(|record| pred(&record.cause))
            .count()
    }
}
