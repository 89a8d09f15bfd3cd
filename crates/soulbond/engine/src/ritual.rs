//! Ritual Consensus Coordinator - everyone online must commit to free one soul.
//!
//! There is at most one ritual in the process. All transitions happen under
//! the coordinator's lock, including the comparison of committed players to
//! the online population, so two commits can never both observe "one short".

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use soulbond_types::{BanEntry, CancelReason, Notice, PlayerId, RitualSite};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::RitualConfig;
use crate::ledger::BanLedger;
use crate::world::World;

/// Reply to a ritual interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum RitualReply {
    /// A new ritual began with the initiator committed.
    Started { committed: usize, total: usize },
    /// The player joined the pending ritual.
    Committed { committed: usize, total: usize },
    AlreadyCommitted,
    /// A ritual is pending at another site.
    Elsewhere,
    /// Consensus reached; this ban was lifted.
    Completed { freed: BanEntry },
    Cancelled(CancelReason),
    Disabled,
    InvalidSite,
    NoBans,
    MissingOffering,
}

/// Read-only view of the pending ritual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RitualProgress {
    pub site: RitualSite,
    pub initiator: PlayerId,
    pub committed: usize,
    pub total: usize,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
struct RitualState {
    site: RitualSite,
    initiator: PlayerId,
    committed: HashSet<PlayerId>,
    start_time: DateTime<Utc>,
}

/// Owns the single optional ritual.
pub struct RitualCoordinator {
    state: Mutex<Option<RitualState>>,
    clock: Arc<dyn Clock>,
}

impl RitualCoordinator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(None),
            clock,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().is_some()
    }

    /// A player used the site: start, join, or get told why not.
    pub fn interact(
        &self,
        world: &dyn World,
        ledger: &BanLedger,
        config: &RitualConfig,
        player: PlayerId,
        site: RitualSite,
    ) -> RitualReply {
        let mut state = self.state.lock();

        if !config.enabled {
            if state.is_some() {
                Self::cancel_locked(world, &mut state, CancelReason::Disabled);
            }
            world.send(&player, &Notice::RitualDisabled);
            return RitualReply::Disabled;
        }

        self.expire_locked(world, &mut state, config);

        if !world.is_valid_site(&site) {
            world.send(&player, &Notice::RitualInvalidSite);
            return RitualReply::InvalidSite;
        }

        match state.as_mut() {
            Some(ritual) if ritual.site != site => {
                world.send(&player, &Notice::RitualElsewhere);
                RitualReply::Elsewhere
            }
            Some(ritual) => {
                if ledger.active_count() == 0 {
                    Self::cancel_locked(world, &mut state, CancelReason::NoBansRemaining);
                    return RitualReply::Cancelled(CancelReason::NoBansRemaining);
                }
                if !ritual.committed.insert(player) {
                    // Someone uncommitted may have left since the last commit.
                    if ritual.committed.len() >= world.online_players().len() {
                        return Self::complete_locked(world, ledger, &mut state);
                    }
                    world.send(&player, &Notice::RitualAlreadyCommitted);
                    return RitualReply::AlreadyCommitted;
                }

                let committed = ritual.committed.len();
                let total = world.online_players().len();
                debug!(player_id = %player, committed, total, "Ritual commitment");
                world.broadcast(&Notice::RitualProgress { committed, total });

                if committed >= total {
                    return Self::complete_locked(world, ledger, &mut state);
                }
                RitualReply::Committed { committed, total }
            }
            None => {
                if ledger.active_count() == 0 {
                    world.send(&player, &Notice::RitualNoBans);
                    return RitualReply::NoBans;
                }
                if !world.has_offering(&player) {
                    world.send(&player, &Notice::RitualMissingOffering);
                    return RitualReply::MissingOffering;
                }

                let total = world.online_players().len();
                *state = Some(RitualState {
                    site: site.clone(),
                    initiator: player,
                    committed: HashSet::from([player]),
                    start_time: self.clock.now(),
                });
                info!(player_id = %player, site = %site, total, "Ritual started");
                world.broadcast(&Notice::RitualStarted {
                    initiator: world.display_name(&player),
                    committed: 1,
                    total,
                });

                if total <= 1 {
                    return Self::complete_locked(world, ledger, &mut state);
                }
                RitualReply::Started { committed: 1, total }
            }
        }
    }

    /// Call off the pending ritual. Returns false when none was pending.
    pub fn cancel(&self, world: &dyn World, reason: CancelReason) -> bool {
        let mut state = self.state.lock();
        if state.is_none() {
            return false;
        }
        Self::cancel_locked(world, &mut state, reason);
        true
    }

    /// A player left.
    ///
    /// A committed participant leaving cancels the ritual. Anyone else
    /// leaving lowers the threshold, which may complete it on the spot.
    pub fn on_disconnect(
        &self,
        world: &dyn World,
        ledger: &BanLedger,
        config: &RitualConfig,
        player: &PlayerId,
    ) -> Option<RitualReply> {
        let mut state = self.state.lock();
        self.expire_locked(world, &mut state, config);
        let ritual = state.as_ref()?;

        if ritual.committed.contains(player) {
            let reason = CancelReason::ParticipantLeft {
                name: world.display_name(player),
            };
            Self::cancel_locked(world, &mut state, reason.clone());
            return Some(RitualReply::Cancelled(reason));
        }

        // The host may still list the leaver as online.
        let committed = ritual.committed.len();
        let total = world
            .online_players()
            .iter()
            .filter(|p| *p != player)
            .count();
        if committed < total {
            return None;
        }
        debug!(player_id = %player, committed, total, "Threshold met by departure");
        Some(Self::complete_locked(world, ledger, &mut state))
    }

    /// Progress of the pending ritual against the current population.
    pub fn progress(&self, world: &dyn World) -> Option<RitualProgress> {
        let state = self.state.lock();
        state.as_ref().map(|ritual| RitualProgress {
            site: ritual.site.clone(),
            initiator: ritual.initiator,
            committed: ritual.committed.len(),
            total: world.online_players().len(),
            started_at: ritual.start_time,
        })
    }

    fn complete_locked(
        world: &dyn World,
        ledger: &BanLedger,
        state: &mut Option<RitualState>,
    ) -> RitualReply {
        let Some(freed) = ledger.random_active_entry() else {
            Self::cancel_locked(world, state, CancelReason::NoBansRemaining);
            return RitualReply::Cancelled(CancelReason::NoBansRemaining);
        };
        let Some(initiator) = state.as_ref().map(|ritual| ritual.initiator) else {
            return RitualReply::Cancelled(CancelReason::Manual);
        };
        if !world.consume_offering(&initiator) {
            Self::cancel_locked(world, state, CancelReason::OfferingLost);
            return RitualReply::Cancelled(CancelReason::OfferingLost);
        }

        if let Some(ritual) = state.take() {
            for participant in &ritual.committed {
                world.play_save_effect(participant);
            }
        }
        ledger.unban(&freed.player_id);

        info!(
            player_id = %freed.player_id,
            tier = freed.tier,
            "Ritual completed"
        );
        world.broadcast(&Notice::RitualCompleted {
            freed: freed.display_name.clone(),
            tier: freed.tier,
        });
        RitualReply::Completed { freed }
    }

    fn expire_locked(
        &self,
        world: &dyn World,
        state: &mut Option<RitualState>,
        config: &RitualConfig,
    ) {
        let timeout = Duration::seconds(i64::try_from(config.timeout_secs).unwrap_or(i64::MAX));
        let timed_out = state
            .as_ref()
            .is_some_and(|ritual| self.clock.now() - ritual.start_time >= timeout);
        if timed_out {
            Self::cancel_locked(world, state, CancelReason::Timeout);
        }
    }

    fn cancel_locked(world: &dyn World, state: &mut Option<RitualState>, reason: CancelReason) {
        if let Some(ritual) = state.take() {
            info!(
                site = %ritual.site,
                committed = ritual.committed.len(),
                reason = %reason,
                "Ritual cancelled"
            );
            world.broadcast(&Notice::RitualCancelled { reason });
        }
    }
}
