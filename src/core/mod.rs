//! Core state: dataref keys, values, and the subscription table.

pub mod cache;
pub mod types;
