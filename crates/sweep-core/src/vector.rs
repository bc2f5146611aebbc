use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SchemaError;
use crate::scalar::{Scalar, ScalarType};

pub const NAME_SLOT: &str = "name";

fn default_executable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ScalarType,
    pub default: Scalar,
    /// Slots with `executable: false` only feed collaborators and are left
    /// off the command line.
    #[serde(default = "default_executable")]
    pub executable: bool,
}

impl SlotDef {
    pub fn new(name: &str, ty: ScalarType, default: impl Into<Scalar>) -> Self {
        Self {
            name: name.to_string(),
            ty,
            default: default.into(),
            executable: true,
        }
    }

    pub fn internal(mut self) -> Self {
        self.executable = false;
        self
    }
}

/// Ordered slot declarations shared by every vector of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    slots: Vec<SlotDef>,
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn new(slots: Vec<SlotDef>) -> Result<Self, SchemaError> {
        let first = slots.first().ok_or(SchemaError::Empty)?;
        if first.name != NAME_SLOT || first.ty != ScalarType::Str {
            return Err(SchemaError::NameSlot(first.name.clone()));
        }
        let mut index = HashMap::with_capacity(slots.len());
        let mut checked = Vec::with_capacity(slots.len());
        for (i, mut slot) in slots.into_iter().enumerate() {
            if index.insert(slot.name.clone(), i).is_some() {
                return Err(SchemaError::DuplicateSlot(slot.name));
            }
            slot.default = slot
                .default
                .coerce(slot.ty)
                .map_err(|source| SchemaError::Value {
                    slot: slot.name.clone(),
                    source,
                })?;
            checked.push(slot);
        }
        // the name slot always reaches the executable
        checked[0].executable = true;
        Ok(Self {
            slots: checked,
            index,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[SlotDef] {
        &self.slots
    }

    pub fn position(&self, name: &str) -> Result<usize, SchemaError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| SchemaError::UnknownSlot(name.to_string()))
    }

    pub fn slot(&self, name: &str) -> Result<&SlotDef, SchemaError> {
        Ok(&self.slots[self.position(name)?])
    }

    pub fn check(&self, name: &str, value: &Scalar) -> Result<Scalar, SchemaError> {
        let slot = self.slot(name)?;
        value.coerce(slot.ty).map_err(|source| SchemaError::Value {
            slot: name.to_string(),
            source,
        })
    }
}

/// One full configuration. Values are positional and always match the
/// schema's length and declared types.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterVector {
    schema: Arc<Schema>,
    values: Vec<Scalar>,
}

impl ParameterVector {
    /// The schema defaults with the name slot set to `name`.
    pub fn from_defaults(schema: Arc<Schema>, name: &str) -> Self {
        let mut values: Vec<Scalar> = schema.slots.iter().map(|s| s.default.clone()).collect();
        values[0] = Scalar::Str(name.to_string());
        Self { schema, values }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn name(&self) -> &str {
        self.values[0].as_str().unwrap_or_default()
    }

    pub fn set_name(&mut self, name: &str) {
        self.values[0] = Scalar::Str(name.to_string());
    }

    pub(crate) fn push_suffix(&mut self, suffix: &str) {
        if let Scalar::Str(name) = &mut self.values[0] {
            name.push_str(suffix);
        }
    }

    pub fn get(&self, slot: &str) -> Result<&Scalar, SchemaError> {
        Ok(&self.values[self.schema.position(slot)?])
    }

    pub fn value_at(&self, index: usize) -> Option<&Scalar> {
        self.values.get(index)
    }

    pub fn set(&mut self, slot: &str, value: &Scalar) -> Result<(), SchemaError> {
        let checked = self.schema.check(slot, value)?;
        let pos = self.schema.position(slot)?;
        self.values[pos] = checked;
        Ok(())
    }

    /// Values are assumed already coerced to the slot type.
    pub(crate) fn set_at(&mut self, index: usize, value: Scalar) {
        self.values[index] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.schema
            .slots
            .iter()
            .map(|s| s.name.as_str())
            .zip(self.values.iter())
    }

    /// Positional command-line arguments: the name, then every
    /// executable-bound slot in declared order.
    pub fn to_args(&self) -> Vec<String> {
        self.schema
            .slots
            .iter()
            .zip(self.values.iter())
            .filter(|(slot, _)| slot.executable)
            .map(|(_, value)| value.to_arg())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(vec![
                SlotDef::new("name", ScalarType::Str, "base"),
                SlotDef::new("nx", ScalarType::Int, 200),
                SlotDef::new("eta", ScalarType::Float, 1.5),
                SlotDef::new("Mh0", ScalarType::Float, 1.0e12),
                SlotDef::new("weight", ScalarType::Float, 0.5).internal(),
            ])
            .expect("valid schema"),
        )
    }

    #[test]
    fn schema_requires_leading_name_slot() {
        let err = Schema::new(vec![SlotDef::new("nx", ScalarType::Int, 1)]).expect_err("no name");
        assert_eq!(err, SchemaError::NameSlot("nx".into()));
        assert_eq!(Schema::new(vec![]).expect_err("empty"), SchemaError::Empty);
    }

    #[test]
    fn schema_rejects_duplicates_and_bad_defaults() {
        let dup = Schema::new(vec![
            SlotDef::new("name", ScalarType::Str, "x"),
            SlotDef::new("a", ScalarType::Int, 1),
            SlotDef::new("a", ScalarType::Int, 2),
        ])
        .expect_err("duplicate");
        assert_eq!(dup, SchemaError::DuplicateSlot("a".into()));

        let bad = Schema::new(vec![
            SlotDef::new("name", ScalarType::Str, "x"),
            SlotDef::new("a", ScalarType::Int, 1.5),
        ])
        .expect_err("fractional default");
        assert!(matches!(bad, SchemaError::Value { .. }));
    }

    #[test]
    fn args_skip_internal_slots_and_keep_order() {
        let v = ParameterVector::from_defaults(small_schema(), "run1");
        assert_eq!(v.to_args(), vec!["run1", "200", "1.5", "1000000000000.0"]);
        assert_eq!(v.len(), 5);
    }

    #[test]
    fn set_coerces_to_declared_type() {
        let mut v = ParameterVector::from_defaults(small_schema(), "run1");
        v.set("eta", &Scalar::Int(2)).expect("int into float slot");
        assert_eq!(v.get("eta").expect("eta"), &Scalar::Float(2.0));
        assert!(v.set("nx", &Scalar::Str("a".into())).is_err());
        assert!(v.set("missing", &Scalar::Int(1)).is_err());
    }
}
