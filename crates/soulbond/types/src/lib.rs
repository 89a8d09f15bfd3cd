//! Soulbond Types - Core types for the consequence and bonding engine
//!
//! Soulbond punishes death with escalating temporary bans and layers
//! cooperative mechanics on top: soul links that share damage between two
//! players, population-wide sharing, and a resurrection ritual that frees one
//! banned player once everyone online agrees.
//!
//! ## Architectural Boundaries
//!
//! - **soulbond-types** owns: identifiers, ban records, typed events,
//!   notices and effect records shared by every layer
//! - **soulbond-engine** owns: the stores, the propagation and resolution
//!   rules, the ritual protocol and persistence
//! - **the host world** owns: health, items, messaging and event delivery
//!
//! ## Key Concepts
//!
//! - **Tier**: Escalation counter per player, drives ban duration
//! - **Bond**: Symmetric pairing between two players
//! - **Save-charge**: One-use resource that cancels a lethal event
//! - **Death pact**: Forced lethal event that follows a bonded death
//! - **Ritual**: Everyone-online consensus that lifts one ban

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod activity;
pub mod ban;
pub mod damage;
pub mod events;
pub mod ids;
pub mod notice;

// Re-export main types
pub use activity::{ActivitySample, Position};
pub use ban::{format_remaining, BanEntry};
pub use damage::DamageCause;
pub use events::{Effect, EngineEvent, EventOutcome, JoinDecision, Verdict};
pub use ids::{PlayerId, RitualSite};
pub use notice::{CancelReason, Notice};
