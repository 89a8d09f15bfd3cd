//! Storage backends for persisted engine state.

mod json;
mod memory;
mod traits;

pub use json::JsonFileStorage;
pub use memory::InMemoryStateStorage;
pub use traits::StateStorage;
