//! Item model shared by the schema, view and query layers.
//!
//! # Invariants
//! - Every item is identified by a stable `ItemId`.
//! - Values are schema-checked before they reach an `Item`.

pub mod item;
pub mod ref_dict;
pub mod value;
