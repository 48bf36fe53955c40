//! core
//!
//! Core domain types, patch parsing, configuration, and locking.
//!
//! # Modules
//!
//! - [`types`] - Strong types: Revision, PatchDigest, SessionId
//! - [`patch`] - Patch metadata parsing
//! - [`config`] - Configuration schema and loading
//! - [`ops`] - Working copy locking
//! - [`paths`] - Centralized path routing for hgland storage
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Parsing is pure and never touches a repository
//! - Schemas are strict and self-describing

pub mod config;
pub mod ops;
pub mod patch;
pub mod paths;
pub mod types;
