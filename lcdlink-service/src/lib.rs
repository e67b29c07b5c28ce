//! # lcdlink-service: USB LCD panel host service
//!
//! Reads a TOML configuration, drives every configured panel with its own
//! `lcdlink_core::Scheduler` task, and hot-reloads the configuration while
//! running.
//!
//! ## Modules
//!
//! - **config**: `ServiceConfig`, the on-disk document and its defaults.
//! - **service**: `LcdService` and the per-device `Supervisor`.

pub mod config;
pub mod service;
