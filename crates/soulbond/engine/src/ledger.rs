//! Ban Ledger - tiers and active timed bans.
//!
//! Tiers and bans are separate maps: a ban expires, the tier stays. Expired
//! bans are evicted when read, never on a timer.

use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use soulbond_types::{BanEntry, PlayerId};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::{BanConfig, BanMode};
use crate::persistence::{BanDocument, TierDocument};

/// Exponent cap for exponential mode.
const MAX_EXPONENT_TIER: u32 = 30;

/// Per-player tiers and active bans.
pub struct BanLedger {
    bans: DashMap<PlayerId, BanEntry>,
    tiers: DashMap<PlayerId, u32>,
    /// Players owed a "returned" announcement on their next allowed join.
    returning: DashMap<PlayerId, ()>,
    clock: Arc<dyn Clock>,
}

impl BanLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            bans: DashMap::new(),
            tiers: DashMap::new(),
            returning: DashMap::new(),
            clock,
        }
    }

    /// Ban duration for the player's next death.
    ///
    /// The tier used is the one the ban would be issued at (current + 1).
    pub fn compute_ban_minutes(&self, player: &PlayerId, is_pvp: bool, config: &BanConfig) -> u32 {
        let tier = self.tier_of(player).saturating_add(1);
        let factor = match config.mode {
            BanMode::Linear => f64::from(tier),
            BanMode::Exponential => {
                let exponent = tier.min(MAX_EXPONENT_TIER) as i32 - 1;
                2f64.powi(exponent)
            }
        };
        let cause_multiplier = if is_pvp {
            config.pvp_multiplier
        } else {
            config.pve_multiplier
        };

        let minutes =
            f64::from(config.base_minutes) * factor * config.global_multiplier * cause_multiplier;
        if minutes.is_nan() || minutes <= 0.0 {
            0
        } else if minutes >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            minutes.ceil() as u32
        }
    }

    /// Raise the tier and replace any ban with a fresh one.
    ///
    /// A zero duration is stretched to one minute so the ban always ends
    /// after it starts.
    pub fn create_ban(
        &self,
        player: PlayerId,
        name: impl Into<String>,
        minutes: u32,
        config: &BanConfig,
    ) -> BanEntry {
        let tier = {
            let mut tier = self.tiers.entry(player).or_insert(0);
            let next = tier.saturating_add(1);
            *tier = match config.max_tier {
                Some(max) => next.min(max),
                None => next,
            };
            *tier
        };

        let start_time = self.clock.now();
        let entry = BanEntry {
            player_id: player,
            display_name: name.into(),
            tier,
            start_time,
            end_time: start_time + Duration::minutes(i64::from(minutes.max(1))),
        };

        self.bans.insert(player, entry.clone());
        self.returning.insert(player, ());

        info!(
            player_id = %player,
            tier = tier,
            minutes = minutes.max(1),
            "Ban created"
        );
        entry
    }

    pub fn is_banned(&self, player: &PlayerId) -> bool {
        self.get_entry(player).is_some()
    }

    /// The live ban for `player`, evicting it first if it has run out.
    pub fn get_entry(&self, player: &PlayerId) -> Option<BanEntry> {
        let now = self.clock.now();
        let expired = self.bans.remove_if(player, |_, ban| ban.is_expired(now));
        if expired.is_some() {
            debug!(player_id = %player, "Ban expired");
            return None;
        }
        self.bans.get(player).map(|ban| ban.clone())
    }

    pub fn tier_of(&self, player: &PlayerId) -> u32 {
        self.tiers.get(player).map(|t| *t).unwrap_or(0)
    }

    pub fn set_tier(&self, player: PlayerId, tier: u32) {
        self.tiers.insert(player, tier);
        info!(player_id = %player, tier = tier, "Tier set");
    }

    /// Add `delta` tiers. Returns the new tier.
    pub fn increment_tier(&self, player: PlayerId, delta: u32) -> u32 {
        let mut tier = self.tiers.entry(player).or_insert(0);
        *tier = tier.saturating_add(delta);
        *tier
    }

    /// Lower the tier by one, stopping at zero. Returns the new tier.
    pub fn decrement_tier(&self, player: PlayerId) -> u32 {
        let mut tier = self.tiers.entry(player).or_insert(0);
        *tier = tier.saturating_sub(1);
        *tier
    }

    /// Remove the ban. The tier is untouched.
    pub fn unban(&self, player: &PlayerId) -> bool {
        self.purge_expired();
        let removed = self.bans.remove(player).is_some();
        if removed {
            info!(player_id = %player, "Ban lifted");
        }
        removed
    }

    /// Remove the ban held under `name` (case-insensitive).
    pub fn unban_by_name(&self, name: &str) -> Option<PlayerId> {
        self.purge_expired();
        let player = self
            .bans
            .iter()
            .find(|ban| ban.display_name.eq_ignore_ascii_case(name))
            .map(|ban| ban.player_id)?;
        self.unban(&player).then_some(player)
    }

    /// Drop every ban. Returns how many were removed.
    pub fn clear_all(&self) -> usize {
        let count = self.bans.len();
        self.bans.clear();
        info!(count = count, "All bans cleared");
        count
    }

    /// Live bans, soonest to expire first.
    pub fn list_active(&self) -> Vec<BanEntry> {
        self.purge_expired();
        let mut bans: Vec<BanEntry> = self.bans.iter().map(|b| b.clone()).collect();
        bans.sort_by(|a, b| a.end_time.cmp(&b.end_time));
        bans
    }

    pub fn active_count(&self) -> usize {
        self.purge_expired();
        self.bans.len()
    }

    /// A uniformly chosen live ban.
    pub fn random_active_entry(&self) -> Option<BanEntry> {
        let active = self.list_active();
        active.choose(&mut rand::thread_rng()).cloned()
    }

    /// Consume the owed return announcement, if any.
    ///
    /// Only succeeds once the player is no longer banned.
    pub fn take_return_announcement(&self, player: &PlayerId) -> bool {
        if self.is_banned(player) {
            return false;
        }
        self.returning.remove(player).is_some()
    }

    /// Evict expired bans. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.bans.len();
        self.bans.retain(|_, ban| !ban.is_expired(now));
        before.saturating_sub(self.bans.len())
    }

    pub fn ban_document(&self) -> BanDocument {
        self.bans
            .iter()
            .map(|ban| (*ban.key(), ban.value().clone()))
            .collect()
    }

    pub fn tier_document(&self) -> TierDocument {
        self.tiers.iter().map(|t| (*t.key(), *t.value())).collect()
    }

    /// Replace contents with persisted documents. Expired bans are dropped.
    ///
    /// Returns the number of bans kept.
    pub fn restore(&self, bans: BanDocument, tiers: TierDocument) -> usize {
        let now = self.clock.now();
        self.bans.clear();
        self.tiers.clear();
        for (player, tier) in tiers {
            self.tiers.insert(player, tier);
        }
        for (player, ban) in bans {
            if !ban.is_expired(now) && ban.player_id == player {
                self.bans.insert(player, ban);
            }
        }
        self.bans.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Utc;
    use proptest::prelude::*;

    fn ledger() -> (BanLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (BanLedger::new(clock.clone()), clock)
    }

    fn unit_config(mode: BanMode) -> BanConfig {
        BanConfig {
            mode,
            base_minutes: 1,
            global_multiplier: 1.0,
            pvp_multiplier: 1.0,
            pve_multiplier: 1.0,
            max_tier: None,
        }
    }

    fn escalate(mode: BanMode) -> Vec<u32> {
        let (ledger, _) = ledger();
        let config = unit_config(mode);
        let player = PlayerId::generate();
        (0..5)
            .map(|_| {
                let minutes = ledger.compute_ban_minutes(&player, false, &config);
                ledger.create_ban(player, "Steve", minutes, &config);
                minutes
            })
            .collect()
    }

    #[test]
    fn test_linear_escalation() {
        assert_eq!(escalate(BanMode::Linear), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_exponential_escalation() {
        assert_eq!(escalate(BanMode::Exponential), vec![1, 2, 4, 8, 16]);
    }

    #[test]
    fn test_exponential_is_bounded() {
        let (ledger, _) = ledger();
        let config = unit_config(BanMode::Exponential);
        let player = PlayerId::generate();
        ledger.set_tier(player, 500);
        assert_eq!(ledger.compute_ban_minutes(&player, false, &config), 1 << 29);
    }

    #[test]
    fn test_multipliers_round_up() {
        let (ledger, _) = ledger();
        let config = BanConfig {
            base_minutes: 10,
            global_multiplier: 1.5,
            pvp_multiplier: 0.33,
            pve_multiplier: 2.0,
            ..unit_config(BanMode::Linear)
        };
        let player = PlayerId::generate();
        // 10 * 1 * 1.5 * 0.33 = 4.95
        assert_eq!(ledger.compute_ban_minutes(&player, true, &config), 5);
        assert_eq!(ledger.compute_ban_minutes(&player, false, &config), 30);
    }

    #[test]
    fn test_max_tier_caps_escalation() {
        let (ledger, _) = ledger();
        let config = BanConfig {
            max_tier: Some(2),
            ..unit_config(BanMode::Linear)
        };
        let player = PlayerId::generate();
        for _ in 0..4 {
            ledger.create_ban(player, "Steve", 1, &config);
        }
        assert_eq!(ledger.tier_of(&player), 2);
    }

    #[test]
    fn test_create_twice_keeps_latest() {
        let (ledger, clock) = ledger();
        let config = unit_config(BanMode::Linear);
        let player = PlayerId::generate();

        ledger.create_ban(player, "Steve", 5, &config);
        clock.advance(Duration::minutes(1));
        let second = ledger.create_ban(player, "Steve", 10, &config);

        assert_eq!(ledger.list_active().len(), 1);
        assert_eq!(ledger.get_entry(&player), Some(second));
        assert_eq!(ledger.tier_of(&player), 2);
    }

    #[test]
    fn test_lazy_expiry_keeps_tier() {
        let (ledger, clock) = ledger();
        let config = unit_config(BanMode::Linear);
        let player = PlayerId::generate();
        ledger.create_ban(player, "Steve", 3, &config);
        assert!(ledger.is_banned(&player));

        clock.advance(Duration::minutes(3));
        assert!(!ledger.is_banned(&player));
        assert!(ledger.get_entry(&player).is_none());
        assert_eq!(ledger.tier_of(&player), 1);
    }

    #[test]
    fn test_zero_minutes_still_ends_after_start() {
        let (ledger, _) = ledger();
        let config = unit_config(BanMode::Linear);
        let entry = ledger.create_ban(PlayerId::generate(), "Steve", 0, &config);
        assert!(entry.end_time > entry.start_time);
    }

    #[test]
    fn test_tier_floor_at_zero() {
        let (ledger, _) = ledger();
        let player = PlayerId::generate();
        assert_eq!(ledger.decrement_tier(player), 0);
        assert_eq!(ledger.increment_tier(player, 3), 3);
        assert_eq!(ledger.decrement_tier(player), 2);
    }

    #[test]
    fn test_unban_by_name_is_case_insensitive() {
        let (ledger, _) = ledger();
        let config = unit_config(BanMode::Linear);
        let player = PlayerId::generate();
        ledger.create_ban(player, "Steve", 5, &config);

        assert_eq!(ledger.unban_by_name("steve"), Some(player));
        assert!(!ledger.is_banned(&player));
        assert_eq!(ledger.unban_by_name("steve"), None);
        assert_eq!(ledger.tier_of(&player), 1);
    }

    #[test]
    fn test_random_entry_skips_expired() {
        let (ledger, clock) = ledger();
        let config = unit_config(BanMode::Linear);
        let short = PlayerId::generate();
        let long = PlayerId::generate();
        ledger.create_ban(short, "Short", 1, &config);
        ledger.create_ban(long, "Long", 60, &config);
        clock.advance(Duration::minutes(2));

        for _ in 0..20 {
            assert_eq!(ledger.random_active_entry().unwrap().player_id, long);
        }
    }

    #[test]
    fn test_random_entry_reaches_every_ban() {
        let (ledger, _) = ledger();
        let config = unit_config(BanMode::Linear);
        let players: Vec<PlayerId> = (0..3).map(|_| PlayerId::generate()).collect();
        for p in &players {
            ledger.create_ban(*p, "P", 60, &config);
        }

        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            seen.insert(ledger.random_active_entry().unwrap().player_id);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_return_announcement_once_after_expiry() {
        let (ledger, clock) = ledger();
        let config = unit_config(BanMode::Linear);
        let player = PlayerId::generate();
        ledger.create_ban(player, "Steve", 1, &config);

        assert!(!ledger.take_return_announcement(&player));
        clock.advance(Duration::minutes(1));
        assert!(ledger.take_return_announcement(&player));
        assert!(!ledger.take_return_announcement(&player));
    }

    #[test]
    fn test_restore_drops_expired() {
        let (ledger, clock) = ledger();
        let config = unit_config(BanMode::Linear);
        let keep = PlayerId::generate();
        let lapse = PlayerId::generate();
        ledger.create_ban(keep, "Keep", 60, &config);
        ledger.create_ban(lapse, "Lapse", 1, &config);
        let bans = ledger.ban_document();
        let tiers = ledger.tier_document();

        clock.advance(Duration::minutes(5));
        let fresh = BanLedger::new(clock.clone());
        assert_eq!(fresh.restore(bans, tiers), 1);
        assert!(fresh.is_banned(&keep));
        assert_eq!(fresh.tier_of(&lapse), 1);
    }

    proptest! {
        #[test]
        fn property_linear_minutes_grow_with_tier(base in 1u32..120, tier in 0u32..50) {
            let (ledger, _) = ledger();
            let config = BanConfig { base_minutes: base, ..unit_config(BanMode::Linear) };
            let player = PlayerId::generate();
            ledger.set_tier(player, tier);
            let lower = ledger.compute_ban_minutes(&player, false, &config);
            ledger.set_tier(player, tier + 1);
            let higher = ledger.compute_ban_minutes(&player, false, &config);
            prop_assert!(higher > lower);
            prop_assert_eq!(higher - lower, base);
        }

        #[test]
        fn property_at_most_one_ban_per_player(minutes in proptest::collection::vec(0u32..100, 1..10)) {
            let (ledger, _) = ledger();
            let config = unit_config(BanMode::Linear);
            let player = PlayerId::generate();
            let mut last = None;
            for m in minutes {
                last = Some(ledger.create_ban(player, "Steve", m, &config));
            }
            prop_assert_eq!(ledger.list_active().len(), 1);
            prop_assert_eq!(ledger.get_entry(&player), last);
        }
    }
}
