//! Service host: HTTP surface, worker lifecycle, and process supervision.

pub mod app;
pub mod cluster;
pub mod context;
pub mod launcher;
pub mod middleware;
pub mod process;
pub mod realtime;
pub mod shutdown;
pub mod worker;
