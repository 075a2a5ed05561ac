//! Elastic render gateway library.
//!
//! This crate primarily ships the `render-gateway` binary, but we expose the
//! gateway core as a library to enable integration testing.

pub mod allocator;
pub mod api;
pub mod config;
pub mod error;
pub mod fleet;
pub mod gateway;
pub mod job;
pub mod ledger;
pub mod probe;
pub mod proxy;
pub mod shutdown;

pub use error::GatewayError;
pub use gateway::{Gateway, GatewaySettings, GatewayStatus};
