//! Payment routing and offline settlement backend.

pub mod api;
#[cfg(feature = "cache")]
pub mod cache;
pub mod compliance;
pub mod config;
#[cfg(feature = "database")]
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod offline;
pub mod payments;
pub mod routing;
pub mod services;
