//! HTTP service for the showroom site: public listings, the session-guarded
//! admin API and the local media mount.

mod admin;
mod catalog;
mod forms;
pub mod middleware;
pub mod server;
mod session;
pub mod telemetry;
