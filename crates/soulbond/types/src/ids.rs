//! Strongly-typed identifiers for Soulbond entities
//!
//! Players are keyed by the host's stable UUID, wrapped in a newtype so a
//! partner id can never be confused with any other UUID in the host.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identifier of a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(Uuid);

impl PlayerId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse the hyphenated form used as a key in persisted documents
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Location of a ritual site in the host world
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RitualSite {
    /// Dimension or world name
    pub dimension: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl RitualSite {
    pub fn new(dimension: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            dimension: dimension.into(),
            x,
            y,
            z,
        }
    }
}

impl fmt::Display for RitualSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{},{},{}", self.dimension, self.x, self.y, self.z)
    }
}
