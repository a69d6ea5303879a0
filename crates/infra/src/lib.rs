//! Infrastructure layer: stores, pub/sub backplane, configuration, and RBAC
//! bootstrap reconciliation.

pub mod backplane;
pub mod bootstrap;
pub mod config;
pub mod store;
