use serde::{Deserialize, Serialize};

use crate::error::ExpandError;
use crate::scalar::{Scalar, ScalarType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Spacing {
    #[default]
    Linear,
    Log,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueSpec {
    List(Vec<Scalar>),
    Range {
        min: f64,
        max: f64,
        count: usize,
        spacing: Spacing,
    },
}

/// A slot that expands into several values. Slots sharing a nonzero
/// `cov` tag advance in lockstep.
#[derive(Debug, Clone, PartialEq)]
pub struct VaryingSlot {
    pub spec: ValueSpec,
    pub cov: u32,
}

impl VaryingSlot {
    pub fn list(values: Vec<Scalar>, cov: u32) -> Self {
        Self {
            spec: ValueSpec::List(values),
            cov,
        }
    }

    pub fn range(min: f64, max: f64, count: usize, spacing: Spacing, cov: u32) -> Self {
        Self {
            spec: ValueSpec::Range {
                min,
                max,
                count,
                spacing,
            },
            cov,
        }
    }

    /// Resolves the slot into concrete values of type `ty`.
    pub fn values(&self, slot: &str, ty: ScalarType) -> Result<Vec<Scalar>, ExpandError> {
        let value_err = |source| {
            ExpandError::Schema(crate::error::SchemaError::Value {
                slot: slot.to_string(),
                source,
            })
        };
        match &self.spec {
            ValueSpec::List(values) => {
                if values.is_empty() {
                    return Err(ExpandError::EmptyList {
                        slot: slot.to_string(),
                    });
                }
                values
                    .iter()
                    .map(|v| v.coerce(ty).map_err(value_err))
                    .collect()
            }
            ValueSpec::Range {
                min,
                max,
                count,
                spacing,
            } => {
                if ty == ScalarType::Str {
                    return Err(ExpandError::StrRange {
                        slot: slot.to_string(),
                    });
                }
                let raw = generate(slot, *min, *max, *count, *spacing)?;
                raw.into_iter()
                    .map(|v| Scalar::from_f64(ty, v).map_err(value_err))
                    .collect()
            }
        }
    }

    /// Multiplies every value; the result is always an explicit list.
    pub fn scaled(&self, slot: &str, ty: ScalarType, factor: f64) -> Result<Self, ExpandError> {
        let values = self
            .values(slot, ty)?
            .iter()
            .map(|v| v.scale(factor))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| {
                ExpandError::Schema(crate::error::SchemaError::Value {
                    slot: slot.to_string(),
                    source,
                })
            })?;
        Ok(Self::list(values, self.cov))
    }
}

pub fn linear(min: f64, max: f64, count: usize) -> Vec<f64> {
    if count == 1 {
        return vec![min];
    }
    let steps = (count - 1) as f64;
    (0..count)
        .map(|i| min + (max - min) * i as f64 / steps)
        .collect()
}

/// Geometric sequence `min * (max/min)^(i/(count-1))`; caller checks that
/// `min` is nonzero and the ratio is positive.
pub fn log(min: f64, max: f64, count: usize) -> Vec<f64> {
    if count == 1 {
        return vec![min];
    }
    let ratio = max / min;
    let steps = (count - 1) as f64;
    (0..count)
        .map(|i| min * ratio.powf(i as f64 / steps))
        .collect()
}

fn generate(
    slot: &str,
    min: f64,
    max: f64,
    count: usize,
    spacing: Spacing,
) -> Result<Vec<f64>, ExpandError> {
    match (count, spacing) {
        (0, _) => Err(ExpandError::EmptyRange {
            slot: slot.to_string(),
        }),
        (1, _) => Ok(vec![min]),
        (_, Spacing::Linear) => Ok(linear(min, max, count)),
        (_, Spacing::Log) => {
            if min == 0.0 {
                return Err(ExpandError::LogFromZero {
                    slot: slot.to_string(),
                });
            }
            if max / min <= 0.0 {
                return Err(ExpandError::LogSignChange {
                    slot: slot.to_string(),
                    min,
                    max,
                });
            }
            Ok(log(min, max, count))
        }
    }
}
