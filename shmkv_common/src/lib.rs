//! shmkv Common Library
//!
//! This crate provides shared constants and configuration loading utilities
//! for all shmkv workspace crates.
//!
//! # Module Structure
//!
//! - [`consts`] - Key derivation, segment header and default tuning constants
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! Add to your `Cargo.toml` with alias for shorter imports:
//! ```toml
//! [dependencies]
//! common = { package = "shmkv_common", path = "../shmkv_common" }
//! ```
//!
//! Then import:
//! ```rust
//! use shmkv_common::consts::*;
//! use shmkv_common::config::{ConfigLoader, SharedConfig};
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
