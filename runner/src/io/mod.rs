//! Collaborators and persistence used by the runner service.

pub mod clock;
pub mod compilation;
pub mod config;
pub mod definition_store;
pub mod delivery;
pub mod events;
pub mod results;
pub mod session_store;
pub mod state_store;
pub mod storage;
