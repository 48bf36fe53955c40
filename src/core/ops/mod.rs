//! core::ops
//!
//! Working copy locking.
//!
//! # Modules
//!
//! - [`lock`] - Exclusive working copy lock
//!
//! # Architecture
//!
//! Every landing session:
//! 1. Acquires the exclusive working copy lock
//! 2. Verifies the working copy is clean before mutating it
//! 3. Restores a clean state on every failure path
//! 4. Releases the lock when the session guard drops

pub mod lock;

pub use lock::{LockError, LockPolicy, WorkingCopyLock};
