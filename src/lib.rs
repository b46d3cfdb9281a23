//! daybook - Change capture and audit logging for persistent-entity stores
//!
//! This library records every create, edit, and delete of tracked domain
//! objects as immutable log entries: what changed, who changed it, when, and
//! optionally why. It hooks into the two-phase flush of a storage engine,
//! computes redacted and size-bounded before-value diffs for pending
//! mutations, and defers creation entries until the engine has assigned real
//! identifiers.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `entity`: Entity identity, field access, and the `Trackable` trait
//! - `entry`: The persisted log entry model with its compact payload
//! - `policy`: Redaction policy and association trigger tables
//! - `diff`: Redacted, size-bounded changeset construction
//! - `context`: Per-flush reason-for-change comments
//! - `config`: Capture behavior flags
//! - `capture`: The flush observer orchestrating the pipeline
//! - `sink`: Staged, durable-on-commit log entry storage
//! - `store`: In-memory reference engine implementing the flush contract
//! - `error`: Custom error types
//!
//! # Example
//!
//! ```rust,ignore
//! use daybook::{
//!     AssociationTriggers, CaptureConfig, ChangeCapture, EntityKind, JsonlSink,
//!     MemoryStore, RedactionPolicy,
//! };
//!
//! let policy = RedactionPolicy::builder()
//!     .redact(EntityKind::of("user"), ["password"])
//!     .build()?;
//! let triggers = AssociationTriggers::new().trigger(EntityKind::of("part_lot"), "part");
//! let mut capture = ChangeCapture::new(CaptureConfig::default(), policy, triggers);
//!
//! let mut store = MemoryStore::new(JsonlSink::new(log_path));
//! store.insert(&part);
//! capture.set_comment("initial import");
//! let receipt = store.commit(&mut capture)?;
//! ```

pub mod capture;
pub mod config;
pub mod context;
pub mod diff;
pub mod entity;
pub mod entry;
pub mod error;
pub mod policy;
pub mod sink;
pub mod store;

pub use capture::{ChangeCapture, FlushContext, FlushObserver, FlushPhase};
pub use config::CaptureConfig;
pub use context::CommentContext;
pub use diff::{ChangeSet, ChangeSetBuilder, DiffSource};
pub use entity::{
    AssociationMeta, EntityId, EntityKind, EntityRef, FieldChange, FieldChanges, FieldMap,
    Trackable,
};
pub use entry::{Level, LogEntry, LogEntryKind};
pub use error::{DaybookError, DaybookResult};
pub use policy::{AssociationTriggers, RedactionPolicy, RedactionPolicyBuilder};
pub use sink::{JsonlSink, LogSink};
pub use store::{CommitReceipt, MemoryStore};
