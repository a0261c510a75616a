//! Purpose: Define the stable public Rust API boundary for file state tracking.
//! Exports: Core types and operations needed by the CLI and embedding applications.
//! Role: Public, additive-only surface; hides internal locking and cache plumbing.
//! Invariants: `StateCoordinator` is the only supported way to read or write labels.
//! Invariants: Storage types are exposed for injection and diagnostics, not direct mutation.

mod config;
mod coordinator;
mod subscription;
mod validation;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::cache::{CacheLookup, StateCache};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::identity::{CaseRule, IdentityKey, IdentityResolver, PathPolicy};
pub use crate::core::label::{Label, MAX_LABEL_BYTES};
pub use crate::core::lock::{LockMode, StoreLock};
pub use crate::core::store::{
    CleanupOutcome, RenameOutcome, SCHEMA_VERSION, SqliteStateStore, StateRecord, StateStore,
    StateWrite, StoreOptions, UnavailableStore,
};
pub use config::EngineConfig;
pub use coordinator::{ApiResult, BatchResult, StateCoordinator};
pub use subscription::{StateCallback, SubscriptionHandle};
pub use validation::{ValidationIssue, ValidationReport, ValidationStatus, validate_store};
