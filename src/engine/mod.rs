//! engine
//!
//! Lands patches on a working copy.
//!
//! # Architecture
//!
//! ```text
//! Session::enter -> Session::apply -> Applier (fast import | fallback) -> Session::close
//! ```
//!
//! - [`session`] owns the working copy: lock, entry preparation, and
//!   restoring it after a failed attempt
//! - [`apply`] owns the two-strategy state machine and the error taxonomy
//! - [`report`] flattens a result for the caller that records it
//!
//! # Invariants
//!
//! - Metadata parsing precedes any mutation
//! - The fast import always precedes the fallback
//! - Conflicts and timeouts are never retried
//! - Every failure leaves the working copy as clean as it was on entry
//!
//! # Example
//!
//! ```ignore
//! use hgland::engine::{Session, SessionOptions, ApplyOutcome};
//!
//! let mut session = Session::enter(&hg, &SessionOptions::default())?;
//! match ApplyOutcome::from_result(session.apply_patch(reader))? {
//!     ApplyOutcome::Success { revision, .. } => println!("landed {}", revision),
//!     ApplyOutcome::Conflict(report) => eprintln!("{}", report),
//!     ApplyOutcome::StructuralError(e) => eprintln!("rejected: {}", e),
//! }
//! session.close()?;
//! ```

pub mod apply;
pub mod report;
pub mod session;

pub use apply::{Applied, Applier, ApplyError, ApplyOutcome, ErrorKind, Strategy};
pub use report::{LandingReport, LandingStatus};
pub use session::{Session, SessionError, SessionOptions};
