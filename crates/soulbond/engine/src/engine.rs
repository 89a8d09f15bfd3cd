//! The engine context.
//!
//! One [`Engine`] owns every store and is handed to whatever delivers host
//! events. Each entry point clones the configuration once up front, so no
//! lock is held while the world is called back and re-enters the engine.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use soulbond_types::{
    format_remaining, BanEntry, CancelReason, DamageCause, Effect, EngineEvent, EventOutcome,
    JoinDecision, Notice, PlayerId, RitualSite, Verdict,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::bonds::{BondGraph, LinkRequestOutcome};
use crate::clock::{Clock, SystemClock};
use crate::config::{BondMode, EngineConfig};
use crate::error::Result;
use crate::ledger::BanLedger;
use crate::lethal::{LethalResolver, LETHAL_DAMAGE};
use crate::mercy::MercyTracker;
use crate::persistence::{DocumentKind, DocumentSnapshot, PersistenceHandle};
use crate::ritual::{RitualCoordinator, RitualProgress, RitualReply};
use crate::sharing::DamageSharer;
use crate::storage::StateStorage;
use crate::world::{Dispatcher, World};

/// Capacity of the effect broadcast channel.
const EFFECT_CHANNEL_CAPACITY: usize = 1024;

/// What [`Engine::restore_from`] loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub bans: usize,
    pub tiers: usize,
    pub bonds: usize,
}

/// Consequence and bonding engine.
pub struct Engine {
    config: RwLock<EngineConfig>,
    world: Arc<dyn World>,
    clock: Arc<dyn Clock>,
    ledger: BanLedger,
    bonds: BondGraph,
    sharer: DamageSharer,
    resolver: LethalResolver,
    ritual: RitualCoordinator,
    mercy: MercyTracker,
    persistence: RwLock<Option<PersistenceHandle>>,
    event_tx: broadcast::Sender<Effect>,
}

impl Engine {
    /// Create an engine on the wall clock.
    pub fn new(config: EngineConfig, world: Arc<dyn World>) -> Self {
        Self::with_clock(config, world, Arc::new(SystemClock))
    }

    pub fn with_clock(config: EngineConfig, world: Arc<dyn World>, clock: Arc<dyn Clock>) -> Self {
        let (event_tx, _) = broadcast::channel(EFFECT_CHANNEL_CAPACITY);
        Self {
            config: RwLock::new(config),
            world,
            ledger: BanLedger::new(clock.clone()),
            bonds: BondGraph::new(clock.clone()),
            sharer: DamageSharer::new(),
            resolver: LethalResolver::new(),
            ritual: RitualCoordinator::new(clock.clone()),
            mercy: MercyTracker::new(clock.clone()),
            clock,
            persistence: RwLock::new(None),
            event_tx,
        }
    }

    /// Send a snapshot after every mutation through `handle`.
    pub fn attach_persistence(&self, handle: PersistenceHandle) {
        *self.persistence.write() = Some(handle);
    }

    /// Subscribe to every effect the engine produces.
    pub fn subscribe(&self) -> broadcast::Receiver<Effect> {
        self.event_tx.subscribe()
    }

    /// Hook for hosts that call back synchronously, such as
    /// [`HeadlessWorld`](crate::world::HeadlessWorld).
    ///
    /// Holds the engine weakly, since the world it is attached to is owned
    /// by the engine.
    pub fn dispatcher(self: &Arc<Self>) -> Dispatcher {
        let engine: Weak<Engine> = Arc::downgrade(self);
        Arc::new(move |event| match engine.upgrade() {
            Some(engine) => engine.dispatch(event),
            None => EventOutcome::allow(),
        })
    }

    pub fn world(&self) -> &Arc<dyn World> {
        &self.world
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ═══════════════════════════════════════════════════════════════════
    // EVENTS
    // ═══════════════════════════════════════════════════════════════════

    /// Route a host event to its handler.
    pub fn dispatch(&self, event: EngineEvent) -> EventOutcome {
        match event {
            EngineEvent::Join { player, name } => {
                let (decision, effects) = self.join(player, &name);
                let mut outcome = if decision.is_allowed() {
                    EventOutcome::allow()
                } else {
                    EventOutcome::cancel()
                };
                outcome.extend(effects);
                outcome
            }
            EngineEvent::Disconnect { player } => {
                self.on_disconnect(player);
                EventOutcome::allow()
            }
            EngineEvent::Damage {
                player,
                amount,
                cause,
            } => self.on_damage(player, amount, cause),
            EngineEvent::Death { player, cause } => self.on_death(player, cause),
            EngineEvent::Tick => {
                let mut outcome = EventOutcome::allow();
                outcome.extend(self.on_tick());
                outcome
            }
        }
    }

    /// Gate a connecting player.
    #[instrument(skip(self))]
    pub fn on_join(&self, player: PlayerId, name: &str) -> JoinDecision {
        self.join(player, name).0
    }

    fn join(&self, player: PlayerId, name: &str) -> (JoinDecision, Vec<Effect>) {
        if let Some(ban) = self.ledger.get_entry(&player) {
            let remaining = format_remaining(ban.remaining(self.clock.now()));
            let message = Notice::Banned {
                tier: ban.tier,
                remaining,
            }
            .to_string();
            debug!(player_id = %player, tier = ban.tier, "Banned player refused");
            return (JoinDecision::Denied { ban, message }, Vec::new());
        }

        let mut effects = Vec::new();
        if self.ledger.take_return_announcement(&player) {
            self.world.broadcast(&Notice::ReturnedFromVoid {
                name: name.to_string(),
            });
            effects.push(Effect::Returned { player });
        }

        let config = self.config.read().clone();
        if let Some(effect) = self.auto_assign(&config, player) {
            effects.push(effect);
        }

        self.publish(&effects);
        (JoinDecision::Allowed, effects)
    }

    /// Forget transient state for a leaving player. Bonds survive.
    #[instrument(skip(self))]
    pub fn on_disconnect(&self, player: PlayerId) {
        self.bonds.on_disconnect(&player);
        self.resolver.forget(&player);
        let config = self.config.read().ritual.clone();
        if let Some(reply) =
            self.ritual
                .on_disconnect(self.world.as_ref(), &self.ledger, &config, &player)
        {
            self.ritual_finished(&reply);
        }
        self.sharer.forget(&player);
    }

    /// Damage is about to land on `player`.
    #[instrument(skip(self))]
    pub fn on_damage(&self, player: PlayerId, amount: f32, cause: DamageCause) -> EventOutcome {
        if cause.is_death_pact() {
            return EventOutcome::allow();
        }
        let config = self.config.read().clone();
        let world = self.world.as_ref();
        // A record left by an earlier allowed hit that the host never applied.
        self.resolver.forget(&player);

        let mirrored = matches!(cause, DamageCause::Shared { .. });
        if mirrored && self.resolver.is_revived(&player) {
            debug!(player_id = %player, "Mirrored hit absorbed by an earlier save");
            return EventOutcome::cancel();
        }

        if LethalResolver::is_lethal(world, &player, amount) {
            let outcome = self
                .resolver
                .resolve(world, &self.bonds, &config, player)
                .unwrap_or_else(EventOutcome::allow);
            if !mirrored {
                // Marks only matter to a fan-out still in progress.
                for effect in &outcome.effects {
                    if let Effect::Revived { player } = effect {
                        self.resolver.take_revived(player);
                    }
                }
            }
            self.publish(&outcome.effects);
            return outcome;
        }

        self.resolver.take_revived(&player);
        let mut outcome = EventOutcome::allow();
        outcome.extend(
            self.sharer
                .share_damage(world, &self.bonds, &config.bond, player, amount),
        );
        for effect in &outcome.effects {
            if let Effect::DamageShared { target, .. } = effect {
                self.resolver.take_revived(target);
            }
        }
        // A save fired for the source while its own hit was being mirrored.
        // The hit would land on the revived state, so the save absorbs it.
        if self.resolver.take_revived(&player) {
            debug!(player_id = %player, "Hit absorbed by save during sharing");
            outcome.verdict = Verdict::Cancel;
        }
        self.publish(&outcome.effects);
        outcome
    }

    /// `player` died: the death pact, then the ban.
    #[instrument(skip(self))]
    pub fn on_death(&self, player: PlayerId, cause: DamageCause) -> EventOutcome {
        let config = self.config.read().clone();
        let world = self.world.as_ref();
        let mut outcome = EventOutcome::allow();

        if config.bond.mode.is_pair() {
            if let Some(partner) = self.bonds.break_link(&player) {
                outcome.push(Effect::LinkBroken { a: player, b: partner });
                self.bonds
                    .record_reassign_cooldown(player, config.bond.reassign_cooldown_minutes);
                self.bonds
                    .record_reassign_cooldown(partner, config.bond.reassign_cooldown_minutes);
                self.persist(&[DocumentKind::Bonds]);

                let spared = self.resolver.take_spared(&player, &partner);
                if !cause.is_death_pact()
                    && !spared
                    && world.is_online(&partner)
                    && world.is_alive(&partner)
                {
                    info!(player_id = %player, partner_id = %partner, "Death pact");
                    world.send(
                        &partner,
                        &Notice::PartnerFell {
                            partner: world.display_name(&player),
                        },
                    );
                    world.deal_damage(&partner, LETHAL_DAMAGE, DamageCause::DeathPact { source: player });
                    outcome.push(Effect::ForcedDeath {
                        player: partner,
                        source: player,
                    });
                }
            }
        }

        let minutes = self
            .ledger
            .compute_ban_minutes(&player, cause.is_pvp(), &config.ban);
        let ban = self
            .ledger
            .create_ban(player, world.display_name(&player), minutes, &config.ban);
        world.send(
            &player,
            &Notice::Banned {
                tier: ban.tier,
                remaining: format_remaining(ban.remaining(self.clock.now())),
            },
        );
        self.mercy.record_death(world, player);
        outcome.push(Effect::BanCreated {
            player,
            tier: ban.tier,
            minutes,
        });
        self.persist(&[DocumentKind::Bans, DocumentKind::Tiers]);

        self.publish(&outcome.effects);
        outcome
    }

    /// One scheduling tick: hunger sharing and deferred auto-pairing.
    pub fn on_tick(&self) -> Vec<Effect> {
        let config = self.config.read().clone();
        let world = self.world.as_ref();
        let mut effects = self.sharer.poll_hunger(world, &self.bonds, &config.bond);

        for player in world.online_players() {
            if let Some(effect) = self.auto_assign(&config, player) {
                effects.push(effect);
            }
        }

        self.publish(&effects);
        effects
    }

    /// Pair the player from the waiting pool if random assignment applies.
    fn auto_assign(&self, config: &EngineConfig, player: PlayerId) -> Option<Effect> {
        if !config.bond.mode.is_pair()
            || !config.bond.random_assignment
            || self.bonds.is_bonded(&player)
            || self.bonds.is_on_random_reassign_cooldown(&player)
            || self.ledger.is_banned(&player)
        {
            return None;
        }

        let partner = self.bonds.try_assign_partner(player)?;
        self.notify_bonded(player, partner);
        self.persist(&[DocumentKind::Bonds]);
        Some(Effect::LinkFormed {
            a: player,
            b: partner,
        })
    }

    // ═══════════════════════════════════════════════════════════════════
    // RITUAL
    // ═══════════════════════════════════════════════════════════════════

    /// A player used a ritual site.
    #[instrument(skip(self))]
    pub fn ritual_interact(&self, player: PlayerId, site: RitualSite) -> RitualReply {
        let config = self.config.read().ritual.clone();
        let reply = self
            .ritual
            .interact(self.world.as_ref(), &self.ledger, &config, player, site);

        self.ritual_finished(&reply);
        reply
    }

    fn ritual_finished(&self, reply: &RitualReply) {
        if let RitualReply::Completed { freed } = reply {
            self.persist(&[DocumentKind::Bans]);
            self.publish(&[Effect::BanLifted {
                player: freed.player_id,
                tier: freed.tier,
            }]);
        }
    }

    /// Call off the pending ritual.
    pub fn cancel_ritual(&self) -> bool {
        self.ritual.cancel(self.world.as_ref(), CancelReason::Manual)
    }

    pub fn ritual_progress(&self) -> Option<RitualProgress> {
        self.ritual.progress(self.world.as_ref())
    }

    // ═══════════════════════════════════════════════════════════════════
    // MERCY
    // ═══════════════════════════════════════════════════════════════════

    /// One mercy decay pass.
    pub fn run_mercy_cycle(&self) -> Vec<Effect> {
        let config = self.config.read().mercy.clone();
        if !config.enabled {
            return Vec::new();
        }

        let effects: Vec<Effect> = self
            .mercy
            .run_cycle(self.world.as_ref(), &self.ledger, &config)
            .into_iter()
            .map(|(player, tier)| Effect::TierDecayed { player, tier })
            .collect();
        if !effects.is_empty() {
            self.persist(&[DocumentKind::Tiers]);
            self.publish(&effects);
        }
        effects
    }

    /// Run [`Engine::run_mercy_cycle`] every configured interval.
    ///
    /// The interval is read again after each cycle, so a configuration
    /// update takes effect from the next wait. The task ends once the
    /// engine is dropped.
    pub fn spawn_mercy_scheduler(self: &Arc<Self>) -> JoinHandle<()> {
        let mut period = self.mercy_period();
        let engine = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                let granted = engine.run_mercy_cycle();
                period = engine.mercy_period();
                debug!(
                    granted = granted.len(),
                    next_in_secs = period.as_secs(),
                    "Mercy cycle finished"
                );
            }
        })
    }

    fn mercy_period(&self) -> std::time::Duration {
        let minutes = self.config.read().mercy.interval_minutes.max(1);
        std::time::Duration::from_secs(u64::from(minutes) * 60)
    }

    // ═══════════════════════════════════════════════════════════════════
    // BONDS
    // ═══════════════════════════════════════════════════════════════════

    /// Ask to bond with `target`; mutual requests form the bond.
    #[instrument(skip(self))]
    pub fn request_link(&self, requester: PlayerId, target: PlayerId) -> LinkRequestOutcome {
        if !self.config.read().bond.mode.is_pair() {
            return LinkRequestOutcome::BondingDisabled;
        }
        let world = self.world.as_ref();
        let outcome = self.bonds.request_link(requester, target);

        match &outcome {
            LinkRequestOutcome::Linked => {
                self.notify_bonded(requester, target);
                self.persist(&[DocumentKind::Bonds]);
                self.publish(&[Effect::LinkFormed {
                    a: requester,
                    b: target,
                }]);
            }
            LinkRequestOutcome::Requested => {
                world.send(
                    &requester,
                    &Notice::LinkRequestSent {
                        to: world.display_name(&target),
                    },
                );
                world.send(
                    &target,
                    &Notice::LinkRequested {
                        from: world.display_name(&requester),
                    },
                );
            }
            LinkRequestOutcome::AlreadyBonded => world.send(&requester, &Notice::AlreadyBonded),
            LinkRequestOutcome::TargetBonded => world.send(
                &requester,
                &Notice::TargetBonded {
                    name: world.display_name(&target),
                },
            ),
            LinkRequestOutcome::SeverCooldown { remaining } => world.send(
                &requester,
                &Notice::SeverCooldown {
                    remaining: format_remaining(*remaining),
                },
            ),
            LinkRequestOutcome::ExPartnerCooldown { remaining } => world.send(
                &requester,
                &Notice::ExPartnerCooldown {
                    remaining: format_remaining(*remaining),
                },
            ),
            LinkRequestOutcome::SelfLink | LinkRequestOutcome::BondingDisabled => {}
        }
        outcome
    }

    pub fn cancel_request(&self, requester: PlayerId) -> bool {
        self.bonds.cancel_request(&requester).is_some()
    }

    /// Voluntarily break the player's bond and pay the severance penalty.
    #[instrument(skip(self))]
    pub fn sever(&self, player: PlayerId) -> Option<PlayerId> {
        let config = self.config.read().bond.clone();
        let world = self.world.as_ref();

        let Some(partner) = self.bonds.break_link(&player) else {
            world.send(&player, &Notice::NotBonded);
            return None;
        };
        self.bonds.record_sever(player, partner, &config);
        if config.sever_tier_penalty > 0 {
            let tier = self.ledger.increment_tier(player, config.sever_tier_penalty);
            debug!(player_id = %player, tier, "Severance penalty applied");
        }

        world.send(
            &player,
            &Notice::LinkSevered {
                partner: world.display_name(&partner),
            },
        );
        world.send(
            &partner,
            &Notice::LinkSevered {
                partner: world.display_name(&player),
            },
        );
        self.persist(&[DocumentKind::Bonds, DocumentKind::Tiers]);
        self.publish(&[Effect::LinkBroken { a: player, b: partner }]);
        Some(partner)
    }

    /// Admin: bond `a` and `b`, breaking their current bonds.
    pub fn set_link(&self, a: PlayerId, b: PlayerId) -> Vec<(PlayerId, PlayerId)> {
        let broken = self.bonds.set_link(a, b);
        if a != b {
            let mut effects: Vec<Effect> = broken
                .iter()
                .map(|(x, y)| Effect::LinkBroken { a: *x, b: *y })
                .collect();
            effects.push(Effect::LinkFormed { a, b });
            self.persist(&[DocumentKind::Bonds]);
            self.publish(&effects);
        }
        broken
    }

    /// Admin: break the player's bond without cooldowns or penalty.
    pub fn break_link(&self, player: PlayerId) -> Option<PlayerId> {
        let partner = self.bonds.break_link(&player)?;
        self.persist(&[DocumentKind::Bonds]);
        self.publish(&[Effect::LinkBroken { a: player, b: partner }]);
        Some(partner)
    }

    pub fn partner_of(&self, player: &PlayerId) -> Option<PlayerId> {
        self.bonds.partner_of(player)
    }

    pub fn waiting_pool(&self) -> Vec<PlayerId> {
        self.bonds.waiting_pool()
    }

    pub fn bonds(&self) -> &BondGraph {
        &self.bonds
    }

    fn notify_bonded(&self, a: PlayerId, b: PlayerId) {
        let world = self.world.as_ref();
        world.send(
            &a,
            &Notice::Bonded {
                partner: world.display_name(&b),
            },
        );
        world.send(
            &b,
            &Notice::Bonded {
                partner: world.display_name(&a),
            },
        );
    }

    // ═══════════════════════════════════════════════════════════════════
    // BANS
    // ═══════════════════════════════════════════════════════════════════

    pub fn tier_of(&self, player: &PlayerId) -> u32 {
        self.ledger.tier_of(player)
    }

    pub fn is_banned(&self, player: &PlayerId) -> bool {
        self.ledger.is_banned(player)
    }

    pub fn ban_entry(&self, player: &PlayerId) -> Option<BanEntry> {
        self.ledger.get_entry(player)
    }

    /// Live bans, soonest to expire first.
    pub fn active_bans(&self) -> Vec<BanEntry> {
        self.ledger.list_active()
    }

    pub fn ledger(&self) -> &BanLedger {
        &self.ledger
    }

    /// Admin: overwrite a tier.
    pub fn set_tier(&self, player: PlayerId, tier: u32) {
        self.ledger.set_tier(player, tier);
        self.persist(&[DocumentKind::Tiers]);
    }

    pub fn unban(&self, player: &PlayerId) -> bool {
        let removed = self.ledger.unban(player);
        if removed {
            self.persist(&[DocumentKind::Bans]);
        }
        removed
    }

    pub fn unban_by_name(&self, name: &str) -> Option<PlayerId> {
        let player = self.ledger.unban_by_name(name)?;
        self.persist(&[DocumentKind::Bans]);
        Some(player)
    }

    /// Admin: lift every ban. Tiers are kept.
    pub fn clear_bans(&self) -> usize {
        let count = self.ledger.clear_all();
        self.persist(&[DocumentKind::Bans]);
        count
    }

    // ═══════════════════════════════════════════════════════════════════
    // CONFIGURATION
    // ═══════════════════════════════════════════════════════════════════

    pub fn config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    /// Replace the configuration after validating it.
    ///
    /// Disabling rituals cancels a pending one.
    pub fn update_config(&self, mut config: EngineConfig) -> Result<()> {
        config.bond.normalize();
        config.validate()?;
        let rituals_enabled = config.ritual.enabled;
        *self.config.write() = config;

        if !rituals_enabled {
            self.ritual.cancel(self.world.as_ref(), CancelReason::Disabled);
        }
        info!("Configuration updated");
        Ok(())
    }

    /// Switch the sharing mode. Only one mode is ever active.
    pub fn set_bond_mode(&self, mode: BondMode) {
        self.config.write().bond.mode = mode;
        info!(?mode, "Bond mode changed");
    }

    // ═══════════════════════════════════════════════════════════════════
    // PERSISTENCE
    // ═══════════════════════════════════════════════════════════════════

    /// Load all three documents, replacing in-memory state.
    pub async fn restore_from(&self, storage: &dyn StateStorage) -> Result<RestoreSummary> {
        let bans = storage.load_bans().await?;
        let tiers = storage.load_tiers().await?;
        let bond_doc = storage.load_bonds().await?;

        let tier_count = tiers.len();
        let ban_count = self.ledger.restore(bans, tiers);
        let bond_count = self.bonds.restore(bond_doc);

        let summary = RestoreSummary {
            bans: ban_count,
            tiers: tier_count,
            bonds: bond_count,
        };
        info!(
            bans = summary.bans,
            tiers = summary.tiers,
            bonds = summary.bonds,
            "State restored"
        );
        Ok(summary)
    }

    fn persist(&self, kinds: &[DocumentKind]) {
        let persistence = self.persistence.read();
        let Some(handle) = persistence.as_ref() else {
            return;
        };
        for kind in kinds {
            handle.submit_with(|| match kind {
                DocumentKind::Bans => DocumentSnapshot::Bans(self.ledger.ban_document()),
                DocumentKind::Tiers => DocumentSnapshot::Tiers(self.ledger.tier_document()),
                DocumentKind::Bonds => DocumentSnapshot::Bonds(self.bonds.bond_document()),
            });
        }
    }

    fn publish(&self, effects: &[Effect]) {
        if self.event_tx.receiver_count() == 0 {
            return;
        }
        for effect in effects {
            let _ = self.event_tx.send(effect.clone());
        }
    }
}
