//! ui
//!
//! User-facing output.
//!
//! # Modules
//!
//! - [`output`] - Output formatting and display
//!
//! hgland never prompts: it runs unattended inside landing workers, so the
//! only interaction is what it prints.

pub mod output;
