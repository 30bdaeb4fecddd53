//! Domain types, the storage seams they sit behind, and the stores implementing them.

pub mod api;
pub mod auth;
pub mod ballot;
pub mod candidate;
pub mod memory;
pub mod mongodb;
pub mod results;
pub mod settings;
