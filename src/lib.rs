//! hgland - Land patches on a Mercurial working copy
//!
//! hgland takes an exported `HG changeset patch`, applies it on top of a
//! clean base revision, and commits it with the author, date and message
//! from the patch header. A strict `hg import` is tried first; when it
//! rejects a patch that an external patch tool can still apply, the patch
//! is applied without committing and committed in a second step.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates to engine)
//! - [`engine`] - Sessions, the two-strategy applier, and landing reports
//! - [`hg`] - Single interface for all Mercurial operations
//! - [`core`] - Patch parsing, domain types, configuration, locking
//! - [`ui`] - Output formatting
//!
//! # Correctness Invariants
//!
//! 1. A patch whose header cannot be read never touches the working copy
//! 2. One session at a time owns a working copy
//! 3. A failed attempt leaves no new commits and no stray files behind
//! 4. Conflicts are reported, never retried

pub mod cli;
pub mod core;
pub mod engine;
pub mod hg;
pub mod ui;
