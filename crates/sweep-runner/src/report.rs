use anyhow::{anyhow, Result};
use serde::Serialize;
use std::path::Path;
use sweep_core::{Dimension, Outcome, Plan};

use crate::layout::{classify_job, JobFiles};

/// Outcome codes laid out over the plan's varied dimensions, first dimension
/// varying fastest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuccessTable {
    pub experiment: String,
    pub shape: Vec<usize>,
    pub axes: Vec<Vec<String>>,
    pub cells: Vec<i8>,
}

fn flat_index(shape: &[usize], coords: &[usize]) -> usize {
    let mut index = 0;
    let mut stride = 1;
    for (c, n) in coords.iter().zip(shape) {
        index += c * stride;
        stride *= n;
    }
    index
}

impl SuccessTable {
    pub fn from_outcomes(
        experiment: &str,
        dims: &[Dimension],
        outcomes: impl IntoIterator<Item = (Vec<usize>, Outcome)>,
    ) -> Self {
        let shape: Vec<usize> = dims.iter().map(|d| d.len).collect();
        let mut cells = vec![Outcome::NotStarted.code(); shape.iter().product()];
        for (coords, outcome) in outcomes {
            let index = flat_index(&shape, &coords);
            if let Some(cell) = cells.get_mut(index) {
                *cell = outcome.code();
            }
        }
        Self {
            experiment: experiment.to_string(),
            shape,
            axes: dims.iter().map(|d| d.slots.clone()).collect(),
            cells,
        }
    }

    /// Classifies every planned job from its files in `exp_dir`.
    pub fn collect(experiment: &str, exp_dir: &Path, plan: &Plan) -> Self {
        Self::from_outcomes(
            experiment,
            &plan.dims,
            plan.runs.iter().map(|run| {
                let files = JobFiles::new(exp_dir, run.display_name());
                (run.coords.clone(), classify_job(&files))
            }),
        )
    }

    pub fn get(&self, coords: &[usize]) -> Option<i8> {
        self.cells.get(flat_index(&self.shape, coords)).copied()
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.cells.iter().filter(|c| **c == outcome.code()).count()
    }

    /// One line per row of the first dimension's values; higher dimensions
    /// become consecutive blocks.
    pub fn render(&self) -> Vec<String> {
        let cells: Vec<String> = self.cells.iter().map(|c| c.to_string()).collect();
        render_cells(&self.shape, &cells)
    }
}

fn render_cells(shape: &[usize], cells: &[String]) -> Vec<String> {
    let width = shape.first().copied().unwrap_or(1).max(1);
    cells
        .chunks(width)
        .map(|row| format!("[ {} ]", row.join(" ")))
        .collect()
}

/// Merges equal-shaped tables into one cell per position holding one digit
/// per experiment in input order (`-` for jobs that never started).
pub fn homogenize(tables: &[SuccessTable]) -> Result<Vec<String>> {
    let first = tables
        .first()
        .ok_or_else(|| anyhow!("no success tables to combine"))?;
    for table in tables {
        if table.shape != first.shape {
            return Err(anyhow!(
                "success table for {} has shape {:?}, expected {:?}",
                table.experiment,
                table.shape,
                first.shape
            ));
        }
    }
    let merged: Vec<String> = (0..first.cells.len())
        .map(|i| {
            tables
                .iter()
                .map(|t| match t.cells[i] {
                    c if c < 0 => "-".to_string(),
                    c => c.to_string(),
                })
                .collect()
        })
        .collect();
    Ok(render_cells(&first.shape, &merged))
}
