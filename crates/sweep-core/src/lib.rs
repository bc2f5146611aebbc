pub mod error;
pub mod expand;
pub mod outcome;
pub mod scalar;
pub mod varying;
pub mod vector;

pub use error::{ExpandError, SchemaError, ValueError};
pub use expand::{consistency_check, expand, suffix, CovariationIssue, Dimension, Plan, PlannedRun};
pub use outcome::{
    classify, classify_text, classify_with_timeout, was_timed_out, Outcome, TIMEOUT_MARKER,
};
pub use scalar::{Scalar, ScalarType};
pub use varying::{Spacing, ValueSpec, VaryingSlot};
pub use vector::{ParameterVector, Schema, SlotDef, NAME_SLOT};
