//! quell-core: original-value capture and redundant restore.
//!
//! quell manages a recurring, reversible override of the per-day quota on a
//! changing set of externally-owned configuration groups. The one guarantee
//! that matters: the value an override temporarily replaces can always be
//! recovered, across process restarts, reinstalls of the controlling
//! component, and divergent replicas of the host's data that synchronize
//! asynchronously.
//!
//! The host application (which owns the groups) and the calendar trigger
//! (which decides whether an override is currently desired) stay behind
//! traits in [`host`] and [`trigger`]; everything else lives here.
//!
//! # Control flow
//!
//! ```text
//! TriggerEvaluator -> ApplyEngine::reconcile(desired, hint)
//!                       |- Host::list_groups()          fresh every pass
//!                       |- capture phase 1: read only   (no mutation yet)
//!                       |- RedundantStore: commit captures, validated
//!                       |- Host::set_value(..)          phase 2: mutate
//!                       `- ErrorReporter -> Summary
//! ```
//!
//! No networking, no cryptography, no background threads. A reconciliation
//! pass runs synchronously to completion; callers must keep at most one
//! pass in flight (`&mut self` enforces it within a process, the CLI takes
//! a file lock across processes).

pub mod backends;
pub mod capture;
pub mod engine;
pub mod error;
pub mod host;
pub mod logging;
pub mod record;
pub mod report;
pub mod store;
pub mod trigger;
pub mod validate;

pub use engine::ApplyEngine;
pub use error::{Error, Result};
pub use record::{Mode, OVERRIDE_SENTINEL, OriginalRecord};
pub use report::{ErrorReporter, Summary};
pub use store::RedundantStore;
pub use validate::{MAX_QUOTA, MIN_QUOTA};
