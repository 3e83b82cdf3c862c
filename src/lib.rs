//! Search & trending service library crate.
//!
//! Exposes every module the `search-trending-service` binary wires
//! together, plus the handful of ambient modules (`auth`, `middleware`)
//! carried over unchanged from the controller layer this was built on.

pub mod auth;
pub mod balance;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod index;
pub mod lifecycle;
pub mod middleware;
pub mod models;
pub mod query;
pub mod search;
pub mod sync;
pub mod trending;

pub use config::Config;
pub use error::{AppError, AppResult};
