//! Command implementations

pub mod append;
pub mod log;
pub mod tracking;
pub mod verify;
