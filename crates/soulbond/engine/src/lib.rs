//! Soulbond Engine - consequences and bonds for a multiplayer world
//!
//! The engine decides what a death costs and who else it touches:
//!
//! - **Ban Ledger** ([`ledger`]): escalating tiers and timed bans, expired
//!   lazily on read
//! - **Bond Graph** ([`bonds`]): symmetric soul links with a waiting pool,
//!   mutual requests and cooldown-gated severance
//! - **Damage sharing** ([`sharing`]): pair or population mirroring of
//!   non-lethal damage and hunger, bounded by a [`guard::RecursionGuard`]
//! - **Lethal resolution** ([`lethal`]): which save-charges fire and who
//!   survives when damage would kill
//! - **Ritual** ([`ritual`]): everyone-online consensus that lifts one ban
//! - **Mercy** ([`mercy`]): active play earns tiers back
//!
//! The host talks to the engine through [`World`] and feeds it
//! [`EngineEvent`](soulbond_types::EngineEvent)s via [`Engine::dispatch`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use soulbond_engine::{Engine, EngineConfig, HeadlessWorld};
//! use soulbond_types::DamageCause;
//!
//! let world = Arc::new(HeadlessWorld::new());
//! let engine = Arc::new(Engine::new(EngineConfig::default(), world.clone()));
//! world.attach(engine.dispatcher());
//!
//! let alex = world.add_player("Alex");
//! world.deal_damage(&alex, 40.0, DamageCause::Environment);
//! assert!(engine.is_banned(&alex));
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod bonds;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod lethal;
pub mod mercy;
pub mod persistence;
pub mod ritual;
pub mod sharing;
pub mod storage;
pub mod world;

pub use bonds::{BondGraph, LinkRequestOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BanConfig, BanMode, BondConfig, BondMode, EngineConfig, MercyConfig, ReviveConfig,
    RitualConfig,
};
pub use engine::{Engine, RestoreSummary};
pub use error::{EngineError, Result};
pub use guard::{GuardToken, RecursionGuard};
pub use ledger::BanLedger;
pub use lethal::{LethalResolver, LETHAL_DAMAGE};
pub use mercy::{MercyRecord, MercyTracker};
pub use persistence::{
    persistence_channel, BanDocument, BondDocument, DocumentKind, DocumentSnapshot,
    PersistenceHandle, PersistenceWriter, TierDocument,
};
pub use ritual::{RitualCoordinator, RitualProgress, RitualReply};
pub use sharing::DamageSharer;
pub use storage::{InMemoryStateStorage, JsonFileStorage, StateStorage};
pub use world::{DamageRecord, Dispatcher, HeadlessWorld, SimPlayer, World, MAX_HEALTH, MAX_HUNGER};
