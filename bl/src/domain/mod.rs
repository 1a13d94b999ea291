//! Domain types for BuildLoop
//!
//! Features come from the external document parser, audit outcomes and gaps
//! from the external code auditor. Both are recomputed every iteration and are
//! never persisted by the core except through a checkpoint snapshot.

mod audit;
mod spec;

pub use audit::{FeatureAudit, FeatureStatus, Gap, GapReport, GapStatus};
pub use spec::{Feature, Spec};
