use thiserror::Error;

use crate::scalar::ScalarType;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("expected {expected} value, got {found}")]
    TypeMismatch {
        expected: ScalarType,
        found: ScalarType,
    },
    #[error("float {0} is not integral and cannot fill an int slot")]
    NotIntegral(f64),
    #[error("cannot parse '{text}' as {expected}")]
    Parse { text: String, expected: ScalarType },
    #[error("cannot scale a {0} value")]
    NotNumeric(ScalarType),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("schema is empty")]
    Empty,
    #[error("slot 0 must be the str slot 'name', found '{0}'")]
    NameSlot(String),
    #[error("duplicate slot '{0}'")]
    DuplicateSlot(String),
    #[error("unknown slot '{0}'")]
    UnknownSlot(String),
    #[error("slot '{slot}': {source}")]
    Value {
        slot: String,
        #[source]
        source: ValueError,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpandError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("slot '{0}' holds the run name and cannot be varied")]
    NameNotVariable(String),
    #[error("slot '{slot}': count must be at least 1")]
    EmptyRange { slot: String },
    #[error("slot '{slot}': log spacing needs a nonzero minimum")]
    LogFromZero { slot: String },
    #[error("slot '{slot}': log spacing needs min and max of the same sign ({min}, {max})")]
    LogSignChange { slot: String, min: f64, max: f64 },
    #[error("slot '{slot}': cannot generate a range for a str slot")]
    StrRange { slot: String },
    #[error("slot '{slot}': value list is empty")]
    EmptyList { slot: String },
    #[error("covariation group {tag} has members of unequal length: {lengths:?}")]
    CovariationMismatch {
        tag: u32,
        lengths: Vec<(String, usize)>,
    },
}
