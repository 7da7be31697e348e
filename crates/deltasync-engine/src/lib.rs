//! Delta synchronization engine.
//!
//! On each cycle the engine pulls a full population from a source, decides
//! what changed against the previously committed baseline, pushes only the
//! changes to a target, and advances the baseline while accounting for push
//! failures and invalid records.
//!
//! The entry point is [`CycleContext::run_cycle`]; everything else is the
//! machinery behind its steps.

#![warn(clippy::pedantic)]

pub mod adapters;
pub mod cancel;
pub mod cycle;
pub mod diff;
pub mod fingerprint;
pub mod locks;
pub mod project;
pub mod repair;
pub mod result;
pub mod validate;

pub use adapters::{Mapped, RawPayload, RecordMapper, SourceAdapter, TargetAdapter};
pub use cancel::CancelToken;
pub use cycle::CycleContext;
pub use diff::set_diff;
pub use fingerprint::{fingerprint, FingerprintOptions};
pub use project::{project, reduce};
pub use repair::{repair, RepairOutcome};
pub use result::{CycleCounts, CycleReport};
pub use validate::{validate_field, validate_record};

/// Common imports for typical usage.
pub mod prelude {
    pub use crate::adapters::{Mapped, RecordMapper, SourceAdapter, TargetAdapter};
    pub use crate::cancel::CancelToken;
    pub use crate::cycle::CycleContext;
    pub use crate::result::CycleReport;
    pub use deltasync_store::{open_store, BaselineStore};
    pub use deltasync_types::{
        BatchResult, CrudKind, Delta, Field, FieldDefinition, FieldSet, FieldType, Result, Schema,
        SingleResult, SingleStatus, StoreConfig, SyncError,
    };
}
