// ── Collaborator stores ──
//
// Traits the engine consumes (configuration lookups, property state,
// change notifications) and their in-memory implementations.

mod collection;
mod repository;
mod state_store;

pub use repository::{ConfigurationRepository, MemoryRepository, PropertyQuery};
pub use state_store::{
    MemoryStateStore, PropertyStateEvent, PropertyStateStore, StateAction, StateNotifications,
};
