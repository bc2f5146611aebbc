use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Int,
    Float,
    Str,
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalarType::Int => "int",
            ScalarType::Float => "float",
            ScalarType::Str => "str",
        };
        f.write_str(s)
    }
}

/// One configuration value. The canonical text form is exactly what the
/// executable receives on its command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Scalar::Int(_) => ScalarType::Int,
            Scalar::Float(_) => ScalarType::Float,
            Scalar::Str(_) => ScalarType::Str,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Floats use the shortest text that parses back to the same bits and
    /// always carry a decimal point or exponent (`2.0`, `1e-7`).
    pub fn to_arg(&self) -> String {
        match self {
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => format!("{:?}", f),
            Scalar::Str(s) => s.clone(),
        }
    }

    pub fn parse(ty: ScalarType, text: &str) -> Result<Scalar, ValueError> {
        let err = || ValueError::Parse {
            text: text.to_string(),
            expected: ty,
        };
        match ty {
            ScalarType::Int => text.trim().parse().map(Scalar::Int).map_err(|_| err()),
            ScalarType::Float => text.trim().parse().map(Scalar::Float).map_err(|_| err()),
            ScalarType::Str => Ok(Scalar::Str(text.to_string())),
        }
    }

    /// Converts `self` to the declared slot type. Ints widen to floats;
    /// floats only narrow to ints when they are integral.
    pub fn coerce(&self, ty: ScalarType) -> Result<Scalar, ValueError> {
        match (ty, self) {
            (ScalarType::Int, Scalar::Int(_))
            | (ScalarType::Float, Scalar::Float(_))
            | (ScalarType::Str, Scalar::Str(_)) => Ok(self.clone()),
            (ScalarType::Float, Scalar::Int(i)) => Ok(Scalar::Float(*i as f64)),
            (ScalarType::Int, Scalar::Float(f)) => {
                if f.is_finite() && f.fract() == 0.0 {
                    Ok(Scalar::Int(*f as i64))
                } else {
                    Err(ValueError::NotIntegral(*f))
                }
            }
            (expected, found) => Err(ValueError::TypeMismatch {
                expected,
                found: found.scalar_type(),
            }),
        }
    }

    /// Builds a generated value for a numeric slot. Int slots round to the
    /// nearest integer.
    pub fn from_f64(ty: ScalarType, value: f64) -> Result<Scalar, ValueError> {
        match ty {
            ScalarType::Int => Ok(Scalar::Int(value.round() as i64)),
            ScalarType::Float => Ok(Scalar::Float(value)),
            ScalarType::Str => Err(ValueError::TypeMismatch {
                expected: ScalarType::Str,
                found: ScalarType::Float,
            }),
        }
    }

    pub fn scale(&self, factor: f64) -> Result<Scalar, ValueError> {
        match self {
            Scalar::Int(i) => Ok(Scalar::Int((*i as f64 * factor).round() as i64)),
            Scalar::Float(f) => Ok(Scalar::Float(f * factor)),
            Scalar::Str(_) => Err(ValueError::NotNumeric(ScalarType::Str)),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_arg())
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Str(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_args_round_trip_exactly() {
        for v in [0.1, 2.0, 1.0e12, -2.0 / 3.0, 1.0e-7, 0.30959] {
            let text = Scalar::Float(v).to_arg();
            let back = Scalar::parse(ScalarType::Float, &text).expect("parse float");
            assert_eq!(back, Scalar::Float(v), "text {}", text);
        }
        assert_eq!(Scalar::Float(2.0).to_arg(), "2.0");
    }

    #[test]
    fn int_and_str_args_are_undecorated() {
        assert_eq!(Scalar::Int(1_000_000_000).to_arg(), "1000000000");
        assert_eq!(Scalar::Str("rf12a".into()).to_arg(), "rf12a");
    }

    #[test]
    fn coerce_widens_ints_and_rejects_fractional_narrowing() {
        assert_eq!(
            Scalar::Int(3).coerce(ScalarType::Float).expect("widen"),
            Scalar::Float(3.0)
        );
        assert_eq!(
            Scalar::Float(4.0).coerce(ScalarType::Int).expect("narrow"),
            Scalar::Int(4)
        );
        assert_eq!(
            Scalar::Float(4.5).coerce(ScalarType::Int),
            Err(ValueError::NotIntegral(4.5))
        );
        assert!(matches!(
            Scalar::Str("x".into()).coerce(ScalarType::Float),
            Err(ValueError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn scale_rounds_int_slots() {
        assert_eq!(Scalar::Int(3).scale(1.5).expect("scale"), Scalar::Int(5));
        assert_eq!(Scalar::Float(3.0).scale(0.5).expect("scale"), Scalar::Float(1.5));
        assert!(Scalar::Str("a".into()).scale(2.0).is_err());
    }
}
