//! Shared patch-queue data models consumed by the core library and backend crates.

pub mod commit;
pub mod patch;

pub use commit::*;
pub use patch::*;
