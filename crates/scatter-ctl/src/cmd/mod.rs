//! CLI command modules.

pub mod hash;
pub mod identity;
pub mod pack;
