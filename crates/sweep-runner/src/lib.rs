pub mod config;
pub mod experiment;
pub mod inputs;
pub mod layout;
pub mod ledger;
pub mod registry;
pub mod report;
pub mod scheduler;

use anyhow::Result;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use sweep_core::{CovariationIssue, Dimension, Plan};
use thiserror::Error;
use tracing::{info, warn};

pub use config::{RunnerSettings, SettingsOverrides, Suite, ROOT_ENV};
pub use experiment::Experiment;
pub use inputs::{copy_shared_inputs, CommandMaterializer, InputMaterializer, InputSlots};
pub use layout::{classify_job, experiment_dir, has_completion_markers, JobFiles};
pub use registry::ExperimentRegistry;
pub use report::{homogenize, SuccessTable};
pub use scheduler::{JobReport, JobSpec, Scheduler, SchedulerConfig, Termination};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(
        "experiment_already_complete: {experiment} already has output in {dir}; \
         pass --overwrite or a nonzero start index to run it again"
    )]
    AlreadyComplete { experiment: String, dir: PathBuf },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub start_at: usize,
    pub overwrite: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSummary {
    pub experiment: String,
    pub exp_dir: PathBuf,
    pub planned: usize,
    pub submitted: usize,
    pub plan_manifest: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentSummary {
    pub experiment: String,
    pub exp_dir: PathBuf,
    pub executable: PathBuf,
    pub total_runs: usize,
    pub dims: Vec<Dimension>,
    pub names: Vec<String>,
    pub issues: Vec<CovariationIssue>,
    pub completed: bool,
}

/// Everything one invocation owns: the experiments it knows about and the
/// table of processes launched for any of them.
pub struct Session {
    pub registry: ExperimentRegistry,
    pub settings: RunnerSettings,
    scheduler: Scheduler,
    materializer: Option<(InputSlots, Box<dyn InputMaterializer>)>,
}

impl Session {
    pub fn new(registry: ExperimentRegistry, settings: RunnerSettings) -> Self {
        let scheduler = Scheduler::new(settings.scheduler.clone());
        let materializer = settings.inputs.clone().map(|(slots, command)| {
            (slots, Box::new(command) as Box<dyn InputMaterializer>)
        });
        Self {
            registry,
            settings,
            scheduler,
            materializer,
        }
    }

    pub fn with_materializer(mut self, slots: InputSlots, materializer: Box<dyn InputMaterializer>) -> Self {
        self.materializer = Some((slots, materializer));
        self
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn experiment_dir(&self, experiment: &str) -> PathBuf {
        experiment_dir(&self.settings.analysis_root, experiment)
    }

    /// Launches `plan[start_at..]` of one experiment without waiting for the
    /// jobs to finish. The concurrency ceiling counts jobs from every
    /// experiment launched through this session.
    pub fn launch_experiment(&mut self, name: &str, options: RunOptions) -> Result<LaunchSummary> {
        let plan = self.registry.require_mut(name)?.expand()?.clone();
        let exp_dir = self.experiment_dir(name);

        if options.start_at == 0 && !options.overwrite && has_completion_markers(&exp_dir) {
            warn!(experiment = name, dir = %exp_dir.display(), "directory already contains output, cancelling run");
            return Err(RunError::AlreadyComplete {
                experiment: name.to_string(),
                dir: exp_dir,
            }
            .into());
        }
        layout::ensure_dir(&exp_dir)?;
        if options.start_at > plan.len() {
            warn!(
                experiment = name,
                start_at = options.start_at,
                planned = plan.len(),
                "start index is past the end of the plan"
            );
        }

        let plan_manifest = ledger::write_plan_manifest(
            &exp_dir,
            name,
            &self.settings.executable,
            &plan,
            options.start_at,
        )?;
        let run_log = exp_dir.join(ledger::RUN_LOG);
        let pending = plan.runs.iter().skip(options.start_at).collect::<Vec<_>>();
        let total = pending.len();

        for (i, run) in pending.into_iter().enumerate() {
            let job_name = run.display_name().to_string();
            let files = JobFiles::new(&exp_dir, &job_name);
            if options.overwrite || options.start_at > 0 {
                scheduler::clear_job_files(&files);
            }
            self.prepare_inputs(&run.vector, &exp_dir);

            info!(
                experiment = name,
                job = %job_name,
                "sending run {}/{} to a local core",
                i + 1,
                total
            );
            self.scheduler.launch(JobSpec {
                experiment: name.to_string(),
                name: job_name,
                program: self.settings.executable.clone(),
                args: run.vector.to_args(),
                work_dir: exp_dir.clone(),
                files,
                run_log: Some(run_log.clone()),
            });
            self.scheduler.wait_for_slot();
        }

        Ok(LaunchSummary {
            experiment: name.to_string(),
            exp_dir,
            planned: plan.len(),
            submitted: total,
            plan_manifest,
        })
    }

    fn prepare_inputs(&self, vector: &sweep_core::ParameterVector, exp_dir: &Path) {
        if let Some((slots, materializer)) = &self.materializer {
            let result = slots
                .request(vector, exp_dir)
                .and_then(|request| materializer.materialize(&request));
            if let Err(e) = result {
                warn!(job = vector.name(), error = %e, "input materialization failed, launching anyway");
            }
        }
        for (path, e) in copy_shared_inputs(&self.settings.shared_inputs, exp_dir) {
            warn!(job = vector.name(), file = %path.display(), error = %e, "failed to copy shared input");
        }
    }

    /// Waits for every job launched through this session.
    pub fn drain(&mut self) -> Vec<JobReport> {
        self.scheduler.drain();
        self.scheduler.take_finished()
    }

    pub fn run_experiment(&mut self, name: &str, options: RunOptions) -> Result<(LaunchSummary, Vec<JobReport>)> {
        let summary = self.launch_experiment(name, options)?;
        Ok((summary, self.drain()))
    }

    /// Launches several experiments back to back and drains once. A refused
    /// experiment is logged and skipped. Any other error stops the batch after
    /// the jobs already launched have finished; their reports are logged and
    /// stay in [`Scheduler::finished`].
    pub fn run_batch(&mut self, names: &[String], options: RunOptions) -> Result<BatchResult> {
        let mut launched = Vec::new();
        let mut refused = Vec::new();
        for name in names {
            match self.launch_experiment(name, options) {
                Ok(summary) => launched.push(summary),
                Err(e) => match e.downcast_ref::<RunError>() {
                    Some(RunError::AlreadyComplete { .. }) => refused.push(name.clone()),
                    None => {
                        self.scheduler.drain();
                        for summary in &launched {
                            info!(
                                experiment = %summary.experiment,
                                submitted = summary.submitted,
                                "batch stopped after this experiment"
                            );
                        }
                        for report in self.scheduler.finished() {
                            info!(
                                experiment = %report.experiment,
                                job = %report.name,
                                outcome = report.outcome.as_str(),
                                "finished before batch stopped"
                            );
                        }
                        return Err(e.context(format!("batch stopped at experiment '{}'", name)));
                    }
                },
            }
        }
        let reports = self.drain();
        Ok(BatchResult {
            launched,
            refused,
            reports,
        })
    }

    pub fn describe(&mut self, name: &str) -> Result<ExperimentSummary> {
        let exp_dir = self.experiment_dir(name);
        let experiment = self.registry.require_mut(name)?;
        let issues = experiment.consistency_check()?;
        let plan = if issues.is_empty() {
            experiment.expand()?.clone()
        } else {
            Plan::default()
        };
        Ok(ExperimentSummary {
            experiment: name.to_string(),
            completed: has_completion_markers(&exp_dir),
            exp_dir,
            executable: self.settings.executable.clone(),
            total_runs: plan.len(),
            dims: plan.dims.clone(),
            names: plan.names().into_iter().map(String::from).collect(),
            issues,
        })
    }

    pub fn success_table(&mut self, name: &str) -> Result<SuccessTable> {
        let exp_dir = self.experiment_dir(name);
        let plan = self.registry.require_mut(name)?.expand()?;
        Ok(SuccessTable::collect(name, &exp_dir, plan))
    }

    /// Writes one shell command per planned job, for submission to an
    /// external batch system.
    pub fn export_batch(&mut self, name: &str, out: &Path) -> Result<usize> {
        let exp_dir = self.experiment_dir(name);
        let executable = self.settings.executable.clone();
        let plan = self.registry.require_mut(name)?.expand()?;
        let mut file = fs::File::create(out)?;
        for run in &plan.runs {
            writeln!(file, "{}", batch_line(&exp_dir, &executable, &run.vector.to_args()))?;
        }
        Ok(plan.len())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub launched: Vec<LaunchSummary>,
    pub refused: Vec<String>,
    pub reports: Vec<JobReport>,
}

pub fn batch_line(exp_dir: &Path, executable: &Path, args: &[String]) -> String {
    let job = args.first().map(String::as_str).unwrap_or("job");
    let files = JobFiles::new(exp_dir, job);
    let mut command = vec![executable.display().to_string()];
    command.extend(args.iter().cloned());
    format!(
        "cd {} && {} > {} 2> {}",
        shell_quote(&exp_dir.display().to_string()),
        shell_join(&command),
        shell_quote(&files.stdout.display().to_string()),
        shell_quote(&files.stderr.display().to_string()),
    )
}

fn shell_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:+".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use sweep_core::{Outcome, Scalar, ScalarType, Schema, SlotDef};

    #[test]
    fn batch_line_quotes_only_when_needed() {
        let line = batch_line(
            Path::new("/data/analysis/rf1"),
            Path::new("/opt/bin/gidget"),
            &["rf1a".to_string(), "1.5".to_string(), "a b".to_string()],
        );
        assert_eq!(
            line,
            "cd /data/analysis/rf1 && /opt/bin/gidget rf1a 1.5 'a b' > /data/analysis/rf1/rf1a_stdo.txt 2> /data/analysis/rf1/rf1a_stde_aux.txt"
        );
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
    }

    fn settings(root: &Path, executable: PathBuf, max_concurrent: usize) -> RunnerSettings {
        RunnerSettings {
            root: root.to_path_buf(),
            executable,
            analysis_root: root.join("analysis"),
            shared_inputs: vec![root.join("Lacey84_table_K.txt"), root.join("missing_table.txt")],
            scheduler: SchedulerConfig {
                max_concurrent,
                timeout: Duration::from_secs(30),
                launch_poll: Duration::from_millis(10),
                drain_poll: Duration::from_millis(20),
            },
            inputs: None,
        }
    }

    fn registry() -> ExperimentRegistry {
        let schema = Arc::new(
            Schema::new(vec![
                SlotDef::new("name", ScalarType::Str, "x"),
                SlotDef::new("a", ScalarType::Int, 1),
                SlotDef::new("b", ScalarType::Float, 0.5),
            ])
            .expect("schema"),
        );
        let mut reg = ExperimentRegistry::new();
        let mut first = Experiment::new(schema.clone(), "exA");
        first
            .irregular_vary("a", vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(3)], 0)
            .expect("vary");
        reg.insert(first);
        let mut second = Experiment::new(schema, "exB");
        second
            .irregular_vary("b", vec![Scalar::Float(0.1), Scalar::Float(0.2)], 0)
            .expect("vary");
        reg.insert(second);
        reg
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-sim");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("script");
        let mut perms = fs::metadata(&path).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    #[cfg(unix)]
    #[test]
    fn batch_runs_every_experiment_and_passes_canonical_args() {
        let root = tempfile::tempdir().expect("root");
        fs::write(root.path().join("Lacey84_table_K.txt"), "k").expect("table");
        let exe = write_script(root.path(), "echo \"$@\"; sleep 0.05");
        let mut session = Session::new(registry(), settings(root.path(), exe, 2));

        let result = session
            .run_batch(&["exA".to_string(), "exB".to_string()], RunOptions::default())
            .expect("batch");
        assert_eq!(result.launched.len(), 2);
        assert!(result.refused.is_empty());
        assert_eq!(result.reports.len(), 5);
        assert!(result.reports.iter().all(|r| r.outcome == Outcome::Success));
        assert!(session.scheduler().peak_active() <= 2);

        let exp_dir = session.experiment_dir("exA");
        let stdout = fs::read_to_string(exp_dir.join("exAb_stdo.txt")).expect("stdout");
        assert_eq!(stdout.trim(), "exAb 2 0.5");
        assert!(exp_dir.join("Lacey84_table_K.txt").exists());
        assert!(exp_dir.join(ledger::PLAN_MANIFEST).exists());

        let table = session.success_table("exB").expect("table");
        assert_eq!(table.cells, vec![0, 0]);
    }

    #[cfg(unix)]
    #[test]
    fn failed_batch_keeps_reports_of_jobs_already_run() {
        let root = tempfile::tempdir().expect("root");
        let exe = write_script(root.path(), "true");
        let mut session = Session::new(registry(), settings(root.path(), exe, 2));
        let err = session
            .run_batch(&["exA".to_string(), "missing".to_string()], RunOptions::default())
            .expect_err("unknown experiment stops the batch");
        assert!(format!("{:#}", err).contains("unknown experiment"), "{:#}", err);
        assert_eq!(session.scheduler().active_count(), 0);
        let finished = session.scheduler().finished();
        assert_eq!(finished.len(), 3);
        assert!(finished.iter().all(|r| r.experiment == "exA"));
        assert!(finished.iter().all(|r| r.outcome == Outcome::Success));
    }

    #[cfg(unix)]
    #[test]
    fn completed_experiment_is_not_rerun_without_override() {
        let root = tempfile::tempdir().expect("root");
        let exe = write_script(root.path(), "touch ran-$1");
        let mut session = Session::new(registry(), settings(root.path(), exe, 1));
        let exp_dir = session.experiment_dir("exA");
        fs::create_dir_all(&exp_dir).expect("dir");
        fs::write(exp_dir.join("exAa_comment.txt"), "finished").expect("marker");

        let err = session
            .launch_experiment("exA", RunOptions::default())
            .expect_err("refused");
        assert!(err.to_string().contains("experiment_already_complete"), "{}", err);
        assert_eq!(session.scheduler().launched(), 0);
        assert_eq!(
            fs::read_to_string(exp_dir.join("exAa_comment.txt")).expect("marker"),
            "finished"
        );
        assert!(!exp_dir.join(ledger::PLAN_MANIFEST).exists());

        let batch = session
            .run_batch(&["exA".to_string()], RunOptions::default())
            .expect("batch");
        assert_eq!(batch.refused, vec!["exA"]);
        assert!(batch.reports.is_empty());

        let (summary, reports) = session
            .run_experiment(
                "exA",
                RunOptions {
                    start_at: 1,
                    overwrite: false,
                },
            )
            .expect("resume");
        assert_eq!(summary.submitted, 2);
        assert_eq!(reports.len(), 2);
        assert!(!exp_dir.join("ran-exAa").exists());
        assert!(exp_dir.join("ran-exAc").exists());
    }

    #[cfg(unix)]
    #[test]
    fn materializer_failure_is_logged_and_job_still_runs() {
        struct Failing;
        impl InputMaterializer for Failing {
            fn materialize(&self, _request: &inputs::MaterializeRequest<'_>) -> Result<()> {
                Err(anyhow::anyhow!("catalog unavailable"))
            }
        }
        let root = tempfile::tempdir().expect("root");
        let exe = write_script(root.path(), "true");
        let slots = InputSlots {
            weight: "b".into(),
            mass: "b".into(),
        };
        let mut session = Session::new(registry(), settings(root.path(), exe, 1))
            .with_materializer(slots, Box::new(Failing));
        let (_, reports) = session
            .run_experiment("exB", RunOptions::default())
            .expect("run");
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.outcome == Outcome::Success));
    }

    #[test]
    fn describe_reports_plan_and_export_writes_one_line_per_job() {
        let root = tempfile::tempdir().expect("root");
        let mut session = Session::new(
            registry(),
            settings(root.path(), root.path().join("bin/gidget"), 1),
        );
        let summary = session.describe("exA").expect("describe");
        assert_eq!(summary.total_runs, 3);
        assert_eq!(summary.names, vec!["exAa", "exAb", "exAc"]);
        assert!(summary.issues.is_empty());
        assert!(!summary.completed);

        let out = root.path().join("runExperiment_exA.txt");
        assert_eq!(session.export_batch("exA", &out).expect("export"), 3);
        let written = fs::read_to_string(&out).expect("batch file");
        assert_eq!(written.lines().count(), 3);
        assert!(written.lines().nth(2).expect("line").contains("exAc 3 0.5"));
    }
}
