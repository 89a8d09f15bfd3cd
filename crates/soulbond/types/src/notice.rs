//! Player-facing notices
//!
//! The engine never formats chat itself at call sites; it hands typed notices
//! to the host, which renders them with `Display` or its own styling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a pending ritual was abandoned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// Nobody completed the ritual in time
    Timeout,
    /// The feature was switched off while pending
    Disabled,
    /// Every ban expired or was lifted before completion
    NoBansRemaining,
    /// A committed participant left
    ParticipantLeft { name: String },
    /// The initiator no longer holds the offering
    OfferingLost,
    /// An operator cancelled it
    Manual,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Timeout => write!(f, "the ritual faded before everyone joined"),
            CancelReason::Disabled => write!(f, "rituals have been disabled"),
            CancelReason::NoBansRemaining => write!(f, "no soul remains in the void"),
            CancelReason::ParticipantLeft { name } => write!(f, "{} abandoned the circle", name),
            CancelReason::OfferingLost => write!(f, "the offering was lost"),
            CancelReason::Manual => write!(f, "the ritual was called off"),
        }
    }
}

/// A message for one player or for everyone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    // ═══════════════════════════════════════════════════════════════════
    // BANS
    // ═══════════════════════════════════════════════════════════════════
    /// Shown to a banned player who tries to join
    Banned { tier: u32, remaining: String },

    /// Broadcast on the first join after a ban expired
    ReturnedFromVoid { name: String },

    /// Tier lowered by mercy decay
    MercyGranted { tier: u32 },

    // ═══════════════════════════════════════════════════════════════════
    // LETHAL OUTCOMES
    // ═══════════════════════════════════════════════════════════════════
    /// A save-charge kept this player alive
    SoulSaved { name: String },

    /// One charge saved both bonded players
    JointSave { saver: String, saved: String },

    /// Population mode: one or more charges saved everyone online
    PopulationSaved { holders: Vec<String> },

    /// Population mode: a death drags everyone down
    PopulationDeath { name: String },

    /// Sent to both partners when neither can be saved
    PulledTowardVoid { partner: String },

    /// The partner died and takes this player along
    PartnerFell { partner: String },

    // ═══════════════════════════════════════════════════════════════════
    // BONDS
    // ═══════════════════════════════════════════════════════════════════
    Bonded { partner: String },
    LinkRequested { from: String },
    LinkRequestSent { to: String },
    LinkSevered { partner: String },
    AlreadyBonded,
    TargetBonded { name: String },
    SeverCooldown { remaining: String },
    ExPartnerCooldown { remaining: String },
    NotBonded,

    // ═══════════════════════════════════════════════════════════════════
    // RITUAL
    // ═══════════════════════════════════════════════════════════════════
    RitualStarted { initiator: String, committed: usize, total: usize },
    RitualProgress { committed: usize, total: usize },
    RitualAlreadyCommitted,
    RitualElsewhere,
    RitualCompleted { freed: String, tier: u32 },
    RitualCancelled { reason: CancelReason },
    RitualDisabled,
    RitualInvalidSite,
    RitualNoBans,
    RitualMissingOffering,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Banned { tier, remaining } => {
                write!(f, "You are lost in the void (tier {}). Return in {}.", tier, remaining)
            }
            Notice::ReturnedFromVoid { name } => write!(f, "{} has returned from the void.", name),
            Notice::MercyGranted { tier } => {
                write!(f, "The void forgives a little. Your tier is now {}.", tier)
            }
            Notice::SoulSaved { name } => write!(f, "{} was pulled back from death.", name),
            Notice::JointSave { saver, saved } => {
                write!(f, "{}'s totem spared both {} and {}.", saver, saver, saved)
            }
            Notice::PopulationSaved { holders } => match holders.as_slice() {
                [one] => write!(f, "{}'s totem saved everyone.", one),
                many => write!(f, "The totems of {} saved everyone.", many.join(", ")),
            },
            Notice::PopulationDeath { name } => {
                write!(f, "{} fell, and everyone fell with them.", name)
            }
            Notice::PulledTowardVoid { partner } => {
                write!(f, "You and {} are pulled toward the void...", partner)
            }
            Notice::PartnerFell { partner } => {
                write!(f, "{} has fallen and your soul follows.", partner)
            }
            Notice::Bonded { partner } => write!(f, "Your soul is now linked with {}.", partner),
            Notice::LinkRequested { from } => {
                write!(f, "{} wants to link souls with you.", from)
            }
            Notice::LinkRequestSent { to } => write!(f, "Link request sent to {}.", to),
            Notice::LinkSevered { partner } => write!(f, "Your link with {} is severed.", partner),
            Notice::AlreadyBonded => write!(f, "Your soul is already linked."),
            Notice::TargetBonded { name } => write!(f, "{} is already linked to another soul.", name),
            Notice::SeverCooldown { remaining } => {
                write!(f, "You cannot link again for {}.", remaining)
            }
            Notice::ExPartnerCooldown { remaining } => {
                write!(f, "You cannot relink with that soul for {}.", remaining)
            }
            Notice::NotBonded => write!(f, "Your soul is not linked."),
            Notice::RitualStarted {
                initiator,
                committed,
                total,
            } => write!(
                f,
                "{} began a resurrection ritual ({}/{}).",
                initiator, committed, total
            ),
            Notice::RitualProgress { committed, total } => {
                write!(f, "The ritual grows stronger ({}/{}).", committed, total)
            }
            Notice::RitualAlreadyCommitted => write!(f, "You have already joined the ritual."),
            Notice::RitualElsewhere => write!(f, "A ritual is already in progress elsewhere."),
            Notice::RitualCompleted { freed, tier } => write!(
                f,
                "The ritual is complete. {} is freed from the void (tier {} remains).",
                freed, tier
            ),
            Notice::RitualCancelled { reason } => write!(f, "The ritual failed: {}.", reason),
            Notice::RitualDisabled => write!(f, "Resurrection rituals are disabled."),
            Notice::RitualInvalidSite => write!(f, "This altar is not complete."),
            Notice::RitualNoBans => write!(f, "There is no soul in the void to bring back."),
            Notice::RitualMissingOffering => write!(f, "You need an offering to begin the ritual."),
        }
    }
}
