// src/db/models/mod.rs

//! Data models for image database entities
//!
//! Each struct corresponds to a table and carries its own CRUD methods.

mod authority;
mod installed;
mod transition;

pub use authority::Authority;
pub use installed::InstalledPackage;
pub use transition::Transition;
