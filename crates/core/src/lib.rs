//! `hive-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod stamp;

pub use error::InvalidId;
pub use id::{PermissionId, RoleId, UserId};
pub use stamp::{Stamped, Stamps, soft_delete, stamp_insert, stamp_update};
