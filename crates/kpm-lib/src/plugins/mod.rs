//! Installed plugin state: the on-disk layout, the identifier registry and the
//! static plugins directory.

pub mod catalog;
pub mod manager;
pub mod registry;
