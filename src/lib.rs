//! Bond-matching and arbitrage-monitoring core.
//!
//! Exposes the core pipeline modules for use by the service binary and
//! integration tests.

pub mod core;
