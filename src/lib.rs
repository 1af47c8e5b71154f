//! ugc-forge library crate.
//!
//! This module exposes the internal components for integration testing.

pub mod config;
pub mod kie;
pub mod session;
pub mod ui;
