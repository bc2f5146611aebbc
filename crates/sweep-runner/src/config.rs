use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sweep_core::{Scalar, Schema, SlotDef, Spacing};

use crate::experiment::Experiment;
use crate::inputs::{CommandMaterializer, InputSlots};
use crate::registry::ExperimentRegistry;
use crate::scheduler::SchedulerConfig;

pub const ROOT_ENV: &str = "SWEEP_ROOT";

fn default_executable() -> PathBuf {
    PathBuf::from("bin/gidget")
}

fn default_analysis_dir() -> PathBuf {
    PathBuf::from("analysis")
}

fn default_max_concurrent() -> usize {
    1
}

fn default_timeout_secs() -> f64 {
    7200.0
}

fn default_launch_poll_ms() -> u64 {
    2_000
}

fn default_drain_poll_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerSection {
    #[serde(default = "default_executable")]
    pub executable: PathBuf,
    #[serde(default = "default_analysis_dir")]
    pub analysis_dir: PathBuf,
    #[serde(default)]
    pub shared_inputs: Vec<PathBuf>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    #[serde(default = "default_launch_poll_ms")]
    pub launch_poll_ms: u64,
    #[serde(default = "default_drain_poll_ms")]
    pub drain_poll_ms: u64,
    #[serde(default)]
    pub inputs: Option<InputsSection>,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            analysis_dir: default_analysis_dir(),
            shared_inputs: Vec::new(),
            max_concurrent: default_max_concurrent(),
            timeout_secs: default_timeout_secs(),
            launch_poll_ms: default_launch_poll_ms(),
            drain_poll_ms: default_drain_poll_ms(),
            inputs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputsSection {
    pub command: Vec<String>,
    pub weight_slot: String,
    pub mass_slot: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaryDef {
    pub slot: String,
    #[serde(default)]
    pub values: Option<Vec<Scalar>>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub spacing: Option<Spacing>,
    #[serde(default)]
    pub cov: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentDef {
    pub name: String,
    /// Start from a copy of an earlier experiment instead of the defaults.
    #[serde(default)]
    pub copy_from: Option<String>,
    /// With `copy_from`, create this many copies named `name` + `a`, `b`, ...
    #[serde(default)]
    pub copies: Option<usize>,
    #[serde(default)]
    pub set: BTreeMap<String, Scalar>,
    #[serde(default)]
    pub vary: Vec<VaryDef>,
    #[serde(default)]
    pub multiply: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteFile {
    pub schema: Vec<SlotDef>,
    #[serde(default)]
    pub runner: RunnerSection,
    #[serde(default)]
    pub experiments: Vec<ExperimentDef>,
}

/// A loaded suite: the validated schema, runner settings and every
/// experiment it defines.
#[derive(Debug, Clone)]
pub struct Suite {
    pub schema: Arc<Schema>,
    pub runner: RunnerSection,
    pub registry: ExperimentRegistry,
}

impl Suite {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading suite file {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("loading suite {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let file: SuiteFile = serde_yaml::from_str(raw)?;
        Self::from_file(file)
    }

    pub fn from_file(file: SuiteFile) -> Result<Self> {
        let schema = Arc::new(Schema::new(file.schema)?);
        if file.runner.max_concurrent == 0 {
            return Err(anyhow!("runner.max_concurrent must be at least 1"));
        }
        if let Some(inputs) = &file.runner.inputs {
            schema.position(&inputs.weight_slot)?;
            schema.position(&inputs.mass_slot)?;
        }
        let mut registry = ExperimentRegistry::new();
        for def in &file.experiments {
            build_experiment(&mut registry, &schema, def)
                .with_context(|| format!("experiment '{}'", def.name))?;
        }
        Ok(Self {
            schema,
            runner: file.runner,
            registry,
        })
    }
}

fn build_experiment(
    registry: &mut ExperimentRegistry,
    schema: &Arc<Schema>,
    def: &ExperimentDef,
) -> Result<()> {
    let names = match (&def.copy_from, def.copies) {
        (Some(from), Some(count)) => registry.derive(from, &def.name, count)?,
        (Some(from), None) => {
            registry.derive_as(from, &def.name)?;
            vec![def.name.clone()]
        }
        (None, Some(_)) => return Err(anyhow!("'copies' needs 'copy_from'")),
        (None, None) => {
            if registry.get(&def.name).is_some() {
                return Err(anyhow!("experiment '{}' defined twice", def.name));
            }
            registry.insert(Experiment::new(schema.clone(), &def.name));
            vec![def.name.clone()]
        }
    };
    for name in names {
        apply_ops(registry.require_mut(&name)?, def)?;
    }
    Ok(())
}

/// Pins first, then ranges and lists, then multipliers.
fn apply_ops(experiment: &mut Experiment, def: &ExperimentDef) -> Result<()> {
    for (slot, value) in &def.set {
        experiment.pin(slot, value)?;
    }
    for vary in &def.vary {
        match (&vary.values, vary.min, vary.count) {
            (Some(values), None, None) if vary.max.is_none() && vary.spacing.is_none() => {
                experiment.irregular_vary(&vary.slot, values.clone(), vary.cov)?;
            }
            (None, Some(min), Some(count)) => {
                let max = vary.max.unwrap_or(min);
                let spacing = vary.spacing.unwrap_or_default();
                experiment.vary(&vary.slot, min, max, count, spacing, vary.cov)?;
            }
            _ => {
                return Err(anyhow!(
                    "vary '{}' needs either 'values' alone or 'min' and 'count' \
                     (with optional 'max' and 'spacing')",
                    vary.slot
                ))
            }
        }
    }
    for (slot, factor) in &def.multiply {
        experiment.multiply(slot, *factor)?;
    }
    Ok(())
}

/// Paths and limits resolved against the process-wide root directory.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    pub root: PathBuf,
    pub executable: PathBuf,
    pub analysis_root: PathBuf,
    pub shared_inputs: Vec<PathBuf>,
    pub scheduler: SchedulerConfig,
    pub inputs: Option<(InputSlots, CommandMaterializer)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsOverrides {
    pub max_concurrent: Option<usize>,
    pub timeout_secs: Option<f64>,
}

impl RunnerSettings {
    pub fn resolve(root: &Path, runner: &RunnerSection, overrides: &SettingsOverrides) -> Result<Self> {
        let max_concurrent = overrides.max_concurrent.unwrap_or(runner.max_concurrent);
        if max_concurrent == 0 {
            return Err(anyhow!("max_concurrent must be at least 1"));
        }
        let timeout_secs = overrides.timeout_secs.unwrap_or(runner.timeout_secs);
        if !(timeout_secs.is_finite() && timeout_secs > 0.0) {
            return Err(anyhow!("timeout must be a positive number of seconds"));
        }
        let timeout = Duration::try_from_secs_f64(timeout_secs)
            .map_err(|e| anyhow!("invalid timeout {}: {}", timeout_secs, e))?;
        let inputs = match &runner.inputs {
            Some(section) => Some((
                InputSlots {
                    weight: section.weight_slot.clone(),
                    mass: section.mass_slot.clone(),
                },
                CommandMaterializer::new(resolve_command(root, &section.command))?,
            )),
            None => None,
        };
        Ok(Self {
            root: root.to_path_buf(),
            executable: root.join(&runner.executable),
            analysis_root: root.join(&runner.analysis_dir),
            shared_inputs: runner.shared_inputs.iter().map(|p| root.join(p)).collect(),
            scheduler: SchedulerConfig {
                max_concurrent,
                timeout,
                launch_poll: Duration::from_millis(runner.launch_poll_ms),
                drain_poll: Duration::from_millis(runner.drain_poll_ms),
            },
            inputs,
        })
    }
}

/// Jobs run inside their experiment directory, so a relative program path
/// is anchored at the root. Bare names are left for `PATH` lookup.
fn resolve_command(root: &Path, command: &[String]) -> Vec<String> {
    let mut resolved = command.to_vec();
    if let Some(program) = resolved.first_mut() {
        let path = Path::new(program.as_str());
        if path.is_relative() && path.components().count() > 1 {
            *program = root.join(path).display().to_string();
        }
    }
    resolved
}
