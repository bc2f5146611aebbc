use anyhow::{anyhow, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use sweep_core::ParameterVector;

/// What a per-job input supplier gets to work with.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializeRequest<'a> {
    pub job_name: &'a str,
    pub work_dir: &'a Path,
    pub weight: f64,
    pub halo_mass: f64,
}

/// Supplies per-job input files into the job's working directory before
/// launch. Failures are reported to the caller, which logs and launches
/// anyway.
pub trait InputMaterializer {
    fn materialize(&self, request: &MaterializeRequest<'_>) -> Result<()>;
}

/// Names the slots whose values feed the materializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSlots {
    pub weight: String,
    pub mass: String,
}

impl InputSlots {
    pub fn request<'a>(
        &self,
        vector: &'a ParameterVector,
        work_dir: &'a Path,
    ) -> Result<MaterializeRequest<'a>> {
        let numeric = |slot: &str| -> Result<f64> {
            vector
                .get(slot)?
                .as_f64()
                .ok_or_else(|| anyhow!("slot '{}' is not numeric", slot))
        };
        Ok(MaterializeRequest {
            job_name: vector.name(),
            work_dir,
            weight: numeric(&self.weight)?,
            halo_mass: numeric(&self.mass)?,
        })
    }
}

/// Delegates to an external helper invoked as
/// `<command...> <job_name> <weight> <log10 halo mass>` inside the job's
/// working directory.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandMaterializer {
    pub command: Vec<String>,
}

impl CommandMaterializer {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() {
            return Err(anyhow!("input materializer command is empty"));
        }
        Ok(Self { command })
    }

    pub fn args_for(&self, request: &MaterializeRequest<'_>) -> Vec<String> {
        let mut args: Vec<String> = self.command[1..].to_vec();
        args.push(request.job_name.to_string());
        args.push(format!("{:?}", request.weight));
        args.push(format!("{:?}", request.halo_mass.log10()));
        args
    }
}

impl InputMaterializer for CommandMaterializer {
    fn materialize(&self, request: &MaterializeRequest<'_>) -> Result<()> {
        if request.halo_mass <= 0.0 {
            return Err(anyhow!(
                "halo mass must be positive for job {} (got {})",
                request.job_name,
                request.halo_mass
            ));
        }
        let output = Command::new(&self.command[0])
            .args(self.args_for(request))
            .current_dir(request.work_dir)
            .stdin(Stdio::null())
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no output");
            return Err(anyhow!(
                "input materializer exited with {:?} for {}: {}",
                output.status.code(),
                request.job_name,
                tail
            ));
        }
        Ok(())
    }
}

/// Copies each shared file into `dest_dir`, returning the ones that failed.
pub fn copy_shared_inputs(files: &[PathBuf], dest_dir: &Path) -> Vec<(PathBuf, anyhow::Error)> {
    let mut failures = Vec::new();
    for src in files {
        let result = src
            .file_name()
            .ok_or_else(|| anyhow!("shared input has no file name"))
            .and_then(|name| {
                fs::copy(src, dest_dir.join(name))?;
                Ok(())
            });
        if let Err(e) = result {
            failures.push((src.clone(), e));
        }
    }
    failures
}
