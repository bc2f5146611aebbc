use std::collections::BTreeMap;

use crate::error::ExpandError;
use crate::scalar::Scalar;
use crate::varying::VaryingSlot;
use crate::vector::ParameterVector;

/// One axis of the expansion: an independent slot, or a covariation group
/// advancing as a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub slots: Vec<String>,
    pub cov: u32,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRun {
    pub vector: ParameterVector,
    /// Value index along each of the plan's dimensions.
    pub coords: Vec<usize>,
}

impl PlannedRun {
    pub fn display_name(&self) -> &str {
        self.vector.name()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Plan {
    pub runs: Vec<PlannedRun>,
    pub dims: Vec<Dimension>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.runs.iter().map(PlannedRun::display_name).collect()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().map(|d| d.len).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CovariationIssue {
    pub tag: u32,
    pub lengths: Vec<(String, usize)>,
}

/// Letter suffix for clone `i`: `a..z`, then `a0..z0`, `a1..z1`, ...
pub fn suffix(i: usize) -> String {
    let letter = char::from(b'a' + (i % 26) as u8);
    if i < 26 {
        letter.to_string()
    } else {
        format!("{}{}", letter, i / 26 - 1)
    }
}

struct Resolved {
    values: Vec<Scalar>,
    cov: u32,
}

fn resolve(
    base: &ParameterVector,
    slots: &BTreeMap<String, VaryingSlot>,
) -> Result<Vec<Option<Resolved>>, ExpandError> {
    let schema = base.schema();
    let mut resolved: Vec<Option<Resolved>> = (0..schema.len()).map(|_| None).collect();
    for (name, slot) in slots {
        let pos = schema.position(name)?;
        if pos == 0 {
            return Err(ExpandError::NameNotVariable(name.clone()));
        }
        let values = slot.values(name, schema.slots()[pos].ty)?;
        resolved[pos] = Some(Resolved {
            values,
            cov: slot.cov,
        });
    }
    Ok(resolved)
}

fn groups(resolved: &[Option<Resolved>]) -> BTreeMap<u32, Vec<usize>> {
    let mut out: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (pos, r) in resolved.iter().enumerate() {
        if let Some(r) = r {
            if r.cov != 0 {
                out.entry(r.cov).or_default().push(pos);
            }
        }
    }
    out
}

fn issues(base: &ParameterVector, resolved: &[Option<Resolved>]) -> Vec<CovariationIssue> {
    let names = base.schema().slots();
    groups(resolved)
        .into_iter()
        .filter_map(|(tag, members)| {
            let lengths: Vec<(String, usize)> = members
                .iter()
                .filter_map(|&m| {
                    resolved[m]
                        .as_ref()
                        .map(|r| (names[m].name.clone(), r.values.len()))
                })
                .collect();
            let first = lengths.first().map(|(_, n)| *n);
            if lengths.iter().all(|(_, n)| Some(*n) == first) {
                None
            } else {
                Some(CovariationIssue { tag, lengths })
            }
        })
        .collect()
}

/// Reports every covariation group whose members resolve to different
/// lengths without failing.
pub fn consistency_check(
    base: &ParameterVector,
    slots: &BTreeMap<String, VaryingSlot>,
) -> Result<Vec<CovariationIssue>, ExpandError> {
    let resolved = resolve(base, slots)?;
    Ok(issues(base, &resolved))
}

/// Expands `base` over every varying slot as a nested cross product in
/// slot-declaration order. Clone `i` of a dimension holds value `i` and,
/// when the dimension has more than one value, gains suffix `suffix(i)`.
pub fn expand(
    base: &ParameterVector,
    slots: &BTreeMap<String, VaryingSlot>,
) -> Result<Plan, ExpandError> {
    let resolved = resolve(base, slots)?;
    if let Some(issue) = issues(base, &resolved).into_iter().next() {
        return Err(ExpandError::CovariationMismatch {
            tag: issue.tag,
            lengths: issue.lengths,
        });
    }
    let groups = groups(&resolved);
    let names = base.schema().slots();

    let mut runs = vec![PlannedRun {
        vector: base.clone(),
        coords: Vec::new(),
    }];
    let mut dims = Vec::new();

    for (pos, entry) in resolved.iter().enumerate() {
        let Some(entry) = entry else { continue };
        let members: Vec<usize> = if entry.cov == 0 {
            vec![pos]
        } else {
            let members = &groups[&entry.cov];
            if members[0] != pos {
                continue;
            }
            members.clone()
        };

        let n = entry.values.len();
        let mut next = Vec::with_capacity(runs.len() * n);
        for i in 0..n {
            for run in &runs {
                let mut cloned = run.clone();
                for &m in &members {
                    if let Some(r) = &resolved[m] {
                        cloned.vector.set_at(m, r.values[i].clone());
                    }
                }
                if n > 1 {
                    cloned.vector.push_suffix(&suffix(i));
                }
                cloned.coords.push(i);
                next.push(cloned);
            }
        }
        runs = next;
        dims.push(Dimension {
            slots: members.iter().map(|&m| names[m].name.clone()).collect(),
            cov: entry.cov,
            len: n,
        });
    }

    Ok(Plan { runs, dims })
}
