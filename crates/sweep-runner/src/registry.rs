use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use sweep_core::suffix;

use crate::experiment::Experiment;

/// Name → experiment table owned by one invocation.
#[derive(Debug, Clone, Default)]
pub struct ExperimentRegistry {
    experiments: BTreeMap<String, Experiment>,
}

impl ExperimentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }

    pub fn insert(&mut self, experiment: Experiment) -> Option<Experiment> {
        self.experiments
            .insert(experiment.name().to_string(), experiment)
    }

    pub fn get(&self, name: &str) -> Option<&Experiment> {
        self.experiments.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Experiment> {
        self.experiments.get_mut(name)
    }

    pub fn require(&self, name: &str) -> Result<&Experiment> {
        self.get(name)
            .ok_or_else(|| anyhow!("unknown experiment '{}'", name))
    }

    pub fn require_mut(&mut self, name: &str) -> Result<&mut Experiment> {
        self.get_mut(name)
            .ok_or_else(|| anyhow!("unknown experiment '{}'", name))
    }

    pub fn names(&self) -> Vec<&str> {
        self.experiments.keys().map(String::as_str).collect()
    }

    /// Every experiment whose name contains `token`, sorted by name.
    pub fn matching(&self, token: &str) -> Vec<String> {
        self.experiments
            .keys()
            .filter(|name| name.contains(token))
            .cloned()
            .collect()
    }

    /// Resolves several tokens, keeping first-seen order and skipping
    /// duplicates. Tokens without a match come back separately.
    pub fn resolve(&self, tokens: &[String]) -> (Vec<String>, Vec<String>) {
        let mut found: Vec<String> = Vec::new();
        let mut unmatched = Vec::new();
        for token in tokens {
            let matches = self.matching(token);
            if matches.is_empty() {
                unmatched.push(token.clone());
            }
            for name in matches {
                if !found.contains(&name) {
                    found.push(name);
                }
            }
        }
        (found, unmatched)
    }

    pub fn rename(&mut self, old: &str, new_name: &str) -> Result<()> {
        if self.experiments.contains_key(new_name) {
            return Err(anyhow!("experiment '{}' already exists", new_name));
        }
        let mut experiment = self
            .experiments
            .remove(old)
            .ok_or_else(|| anyhow!("unknown experiment '{}'", old))?;
        experiment.rename(new_name);
        self.insert(experiment);
        Ok(())
    }

    /// Copies `from` under exactly `new_name`.
    pub fn derive_as(&mut self, from: &str, new_name: &str) -> Result<&mut Experiment> {
        if self.experiments.contains_key(new_name) {
            return Err(anyhow!("experiment '{}' already exists", new_name));
        }
        let mut copy = self.require(from)?.clone();
        copy.rename(new_name);
        self.insert(copy);
        self.require_mut(new_name)
    }

    /// Makes `count` copies of `from` named `name` + `a`, `b`, ...
    pub fn derive(&mut self, from: &str, name: &str, count: usize) -> Result<Vec<String>> {
        let names: Vec<String> = (0..count).map(|i| format!("{}{}", name, suffix(i))).collect();
        for new_name in &names {
            self.derive_as(from, new_name)?;
        }
        Ok(names)
    }
}
