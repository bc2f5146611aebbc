use std::collections::BTreeMap;
use std::sync::Arc;
use sweep_core::{
    consistency_check, expand, CovariationIssue, ExpandError, ParameterVector, Plan, Scalar,
    Schema, Spacing, VaryingSlot,
};

/// A named sweep: a base vector, the slots varied over it, and the plan
/// derived from both. Every mutation discards the plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    name: String,
    base: ParameterVector,
    varying: BTreeMap<String, VaryingSlot>,
    plan: Option<Plan>,
}

impl Experiment {
    pub fn new(schema: Arc<Schema>, name: &str) -> Self {
        Self {
            name: name.to_string(),
            base: ParameterVector::from_defaults(schema, name),
            varying: BTreeMap::new(),
            plan: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> &ParameterVector {
        &self.base
    }

    pub fn varying(&self) -> &BTreeMap<String, VaryingSlot> {
        &self.varying
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    fn check_variable(&self, slot: &str) -> Result<usize, ExpandError> {
        let pos = self.base.schema().position(slot)?;
        if pos == 0 {
            return Err(ExpandError::NameNotVariable(slot.to_string()));
        }
        Ok(pos)
    }

    /// Overrides a slot with one value and drops any range set on it.
    pub fn pin(&mut self, slot: &str, value: &Scalar) -> Result<(), ExpandError> {
        self.check_variable(slot)?;
        self.base.set(slot, value)?;
        self.varying.remove(slot);
        self.plan = None;
        Ok(())
    }

    /// Varies `slot` over a generated range. `count == 1` pins it to `min`.
    pub fn vary(
        &mut self,
        slot: &str,
        min: f64,
        max: f64,
        count: usize,
        spacing: Spacing,
        cov: u32,
    ) -> Result<Vec<Scalar>, ExpandError> {
        let pos = self.check_variable(slot)?;
        let ty = self.base.schema().slots()[pos].ty;
        let varying = VaryingSlot::range(min, max, count, spacing, cov);
        let values = varying.values(slot, ty)?;
        if count == 1 {
            self.pin(slot, &values[0])?;
        } else {
            self.varying.insert(slot.to_string(), varying);
            self.plan = None;
        }
        Ok(values)
    }

    /// Varies `slot` over an explicit list. A single-element list is kept as
    /// a varying slot; it never adds a name suffix.
    pub fn irregular_vary(
        &mut self,
        slot: &str,
        values: Vec<Scalar>,
        cov: u32,
    ) -> Result<Vec<Scalar>, ExpandError> {
        let pos = self.check_variable(slot)?;
        let ty = self.base.schema().slots()[pos].ty;
        let varying = VaryingSlot::list(values, cov);
        let resolved = varying.values(slot, ty)?;
        self.varying.insert(slot.to_string(), varying);
        self.plan = None;
        Ok(resolved)
    }

    /// Scales the slot's values, varying or pinned, by `factor`.
    pub fn multiply(&mut self, slot: &str, factor: f64) -> Result<Vec<Scalar>, ExpandError> {
        let pos = self.check_variable(slot)?;
        let ty = self.base.schema().slots()[pos].ty;
        let scaled = match self.varying.get(slot) {
            Some(varying) => varying.scaled(slot, ty, factor)?,
            None => VaryingSlot::list(vec![self.base.get(slot)?.clone()], 0)
                .scaled(slot, ty, factor)?,
        };
        let values = scaled.values(slot, ty)?;
        if self.varying.contains_key(slot) {
            self.varying.insert(slot.to_string(), scaled);
            self.plan = None;
        } else {
            self.pin(slot, &values[0])?;
        }
        Ok(values)
    }

    /// Renames the experiment and every vector derived from it, keeping the
    /// suffixes already attached to expanded names.
    pub fn rename(&mut self, new_name: &str) {
        let old = std::mem::replace(&mut self.name, new_name.to_string());
        self.base.set_name(new_name);
        if let Some(plan) = &mut self.plan {
            for run in &mut plan.runs {
                let suffix = run
                    .vector
                    .name()
                    .strip_prefix(old.as_str())
                    .unwrap_or_default()
                    .to_string();
                run.vector.set_name(&format!("{}{}", new_name, suffix));
            }
        }
    }

    /// Recomputes the plan from scratch.
    pub fn expand(&mut self) -> Result<&Plan, ExpandError> {
        self.plan = None;
        let plan = expand(&self.base, &self.varying)?;
        let plan: &Plan = self.plan.insert(plan);
        Ok(plan)
    }

    pub fn consistency_check(&self) -> Result<Vec<CovariationIssue>, ExpandError> {
        consistency_check(&self.base, &self.varying)
    }
}
