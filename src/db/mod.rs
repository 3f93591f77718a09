//! Workflow engine record: instances, their pending step and transition history.
//!
//! - `model`: rows returned to the engine and to inspection tools.
//! - `repo`: SQL-only functions that map rows into those models.
//!
//! This is the only durable state on our side; restore progress itself is
//! always re-read from the store.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{ClaimedStep, InstanceRecord, NewInstance, TransitionRecord};
