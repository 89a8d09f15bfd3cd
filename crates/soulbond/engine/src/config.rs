//! Engine configuration.
//!
//! Every section has defaults so a partial TOML file is enough. Pair and
//! population bonding are a single [`BondMode`], which makes "both enabled"
//! unrepresentable; the boolean toggles older configs used are still read
//! and normalised with population winning.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ban: BanConfig,
    pub bond: BondConfig,
    pub ritual: RitualConfig,
    pub mercy: MercyConfig,
    pub revive: ReviveConfig,
}

impl EngineConfig {
    /// Parse, normalise and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: EngineConfig =
            toml::from_str(contents).map_err(|e| EngineError::Config(e.to_string()))?;
        config.bond.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Load from a file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Switch to population-wide bonding. Pair bonding is turned off with it.
    pub fn enable_population_sharing(&mut self) {
        self.bond.mode = BondMode::Population;
    }

    /// Switch to pair bonding unless population bonding is active.
    ///
    /// Returns whether pair mode is now in effect.
    pub fn enable_pair_sharing(&mut self) -> bool {
        match self.bond.mode {
            BondMode::Population => false,
            _ => {
                self.bond.mode = BondMode::Pair;
                true
            }
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, value: f32| {
            if value.is_finite() && (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(EngineError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )))
            }
        };
        let multiplier = |name: &str, value: f64| {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(EngineError::InvalidConfig(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )))
            }
        };

        unit("bond.pair_share_fraction", self.bond.pair_share_fraction)?;
        unit("bond.pool_share_fraction", self.bond.pool_share_fraction)?;
        multiplier("ban.global_multiplier", self.ban.global_multiplier)?;
        multiplier("ban.pvp_multiplier", self.ban.pvp_multiplier)?;
        multiplier("ban.pve_multiplier", self.ban.pve_multiplier)?;

        if self.ritual.timeout_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "ritual.timeout_secs must be positive".to_string(),
            ));
        }
        if self.mercy.interval_minutes == 0 {
            return Err(EngineError::InvalidConfig(
                "mercy.interval_minutes must be positive".to_string(),
            ));
        }
        if !(self.revive.health.is_finite() && self.revive.health > 0.0) {
            return Err(EngineError::InvalidConfig(
                "revive.health must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// How ban durations grow with tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanMode {
    /// `base * tier`
    #[default]
    Linear,
    /// `base * 2^(tier - 1)`
    Exponential,
}

/// Ban duration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BanConfig {
    pub mode: BanMode,
    pub base_minutes: u32,
    pub global_multiplier: f64,
    pub pvp_multiplier: f64,
    pub pve_multiplier: f64,
    /// Highest tier a death can push a player to. `None` is unbounded.
    pub max_tier: Option<u32>,
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            mode: BanMode::Linear,
            base_minutes: 30,
            global_multiplier: 1.0,
            pvp_multiplier: 1.0,
            pve_multiplier: 1.0,
            max_tier: None,
        }
    }
}

/// Which bonding layer is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BondMode {
    Disabled,
    /// Soul links between pairs of players
    #[default]
    Pair,
    /// Everyone online shares one fate
    Population,
}

impl BondMode {
    /// Collapse two independent toggles. Population wins when both are set.
    pub fn from_toggles(pair: bool, population: bool) -> Self {
        match (pair, population) {
            (_, true) => BondMode::Population,
            (true, false) => BondMode::Pair,
            (false, false) => BondMode::Disabled,
        }
    }

    pub fn is_pair(&self) -> bool {
        matches!(self, BondMode::Pair)
    }

    pub fn is_population(&self) -> bool {
        matches!(self, BondMode::Population)
    }
}

/// Bonding, sharing and save-charge settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BondConfig {
    pub mode: BondMode,

    /// Legacy toggle, folded into `mode` on load.
    #[serde(skip_serializing)]
    pub pair_enabled: Option<bool>,

    /// Legacy toggle, folded into `mode` on load.
    #[serde(skip_serializing)]
    pub population_enabled: Option<bool>,

    /// Share of a player's damage mirrored to their partner.
    pub pair_share_fraction: f32,

    /// Share of a player's damage mirrored to everyone else online.
    pub pool_share_fraction: f32,

    /// Mirror hunger changes as well as damage.
    pub share_hunger: bool,

    /// Population mode: any charge online saves everyone.
    pub totem_saves_all: bool,

    /// Pair mode: one partner's charge saves both.
    pub totem_saves_partner: bool,

    /// Pair unbonded players automatically on join.
    pub random_assignment: bool,

    pub sever_cooldown_minutes: u32,
    pub ex_partner_cooldown_minutes: u32,
    pub reassign_cooldown_minutes: u32,

    /// Tiers added to a player who severs their own bond.
    pub sever_tier_penalty: u32,
}

impl Default for BondConfig {
    fn default() -> Self {
        Self {
            mode: BondMode::Pair,
            pair_enabled: None,
            population_enabled: None,
            pair_share_fraction: 1.0,
            pool_share_fraction: 1.0,
            share_hunger: true,
            totem_saves_all: true,
            totem_saves_partner: true,
            random_assignment: true,
            sever_cooldown_minutes: 10,
            ex_partner_cooldown_minutes: 60,
            reassign_cooldown_minutes: 5,
            sever_tier_penalty: 1,
        }
    }
}

impl BondConfig {
    /// Fold legacy toggles into `mode`.
    pub fn normalize(&mut self) {
        if self.pair_enabled.is_none() && self.population_enabled.is_none() {
            return;
        }
        let pair = self.pair_enabled.take().unwrap_or(self.mode.is_pair());
        let population = self
            .population_enabled
            .take()
            .unwrap_or(self.mode.is_population());
        self.mode = BondMode::from_toggles(pair, population);
    }
}

/// Resurrection ritual settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RitualConfig {
    pub enabled: bool,
    /// Time from initiation until a pending ritual lapses.
    pub timeout_secs: u64,
}

impl Default for RitualConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 120,
        }
    }
}

/// Mercy decay settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MercyConfig {
    pub enabled: bool,
    /// How often the scheduler runs.
    pub interval_minutes: u32,
    /// Non-idle play needed since the last death (or last mercy) per tier.
    pub required_hours: u32,
    pub ticks_per_hour: u64,
    /// Movement over one interval that counts as active.
    pub min_movement: f64,
    /// Interactions over one interval that count as active.
    pub min_interactions: u64,
}

impl Default for MercyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 10,
            required_hours: 2,
            ticks_per_hour: 72_000,
            min_movement: 16.0,
            min_interactions: 10,
        }
    }
}

impl MercyConfig {
    pub fn required_ticks(&self) -> u64 {
        u64::from(self.required_hours).saturating_mul(self.ticks_per_hour)
    }
}

/// Minimal survival state applied when a save-charge fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviveConfig {
    pub health: f32,
    pub absorption_secs: u32,
    pub regeneration_secs: u32,
    pub fire_resistance_secs: u32,
}

impl Default for ReviveConfig {
    fn default() -> Self {
        Self {
            health: 1.0,
            absorption_secs: 5,
            regeneration_secs: 45,
            fire_resistance_secs: 40,
        }
    }
}
