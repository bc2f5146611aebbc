use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use sweep_core::{Outcome, TIMEOUT_MARKER};
use tracing::{debug, error, info, warn};

use crate::layout::{classify_job, JobFiles};
use crate::ledger::append_event;

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub max_concurrent: usize,
    pub timeout: Duration,
    /// Interval while waiting for a free slot.
    pub launch_poll: Duration,
    /// Interval while draining the final batch.
    pub drain_poll: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            timeout: Duration::from_secs(7200),
            launch_poll: Duration::from_secs(2),
            drain_poll: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub experiment: String,
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    pub files: JobFiles,
    pub run_log: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    Exited(Option<i32>),
    TimedOut,
    LaunchFailed(String),
    WaitFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub experiment: String,
    pub name: String,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub termination: Termination,
    pub outcome: Outcome,
}

/// A launched process the scheduler still considers active.
#[derive(Debug)]
pub struct RunRecord {
    pub job: JobSpec,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    started: Instant,
    child: Child,
}

impl RunRecord {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Single-threaded launcher over a shared table of active processes.
/// Liveness is only ever learned by polling `try_wait`.
#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    active: Vec<RunRecord>,
    finished: Vec<JobReport>,
    peak_active: usize,
    launched: usize,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            active: Vec::new(),
            finished: Vec::new(),
            peak_active: 0,
            launched: 0,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn active(&self) -> &[RunRecord] {
        &self.active
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Highest active count seen at any launch or poll.
    pub fn peak_active(&self) -> usize {
        self.peak_active
    }

    pub fn launched(&self) -> usize {
        self.launched
    }

    pub fn finished(&self) -> &[JobReport] {
        &self.finished
    }

    pub fn take_finished(&mut self) -> Vec<JobReport> {
        std::mem::take(&mut self.finished)
    }

    fn observe(&mut self) {
        self.peak_active = self.peak_active.max(self.active.len());
    }

    /// Spawns one job with stdout and stderr redirected to its files. A spawn
    /// failure is written to the job's stderr file and recorded as finished.
    pub fn launch(&mut self, job: JobSpec) -> bool {
        let started_at = Utc::now();
        match spawn(&job) {
            Ok(child) => {
                let pid = child.id();
                info!(
                    experiment = %job.experiment,
                    job = %job.name,
                    pid,
                    "launched"
                );
                log_event(&job, "started", json!({ "pid": pid, "args": job.args }));
                self.active.push(RunRecord {
                    job,
                    pid,
                    started_at,
                    started: Instant::now(),
                    child,
                });
                self.launched += 1;
                self.observe();
                true
            }
            Err(e) => {
                let message = e.to_string();
                error!(experiment = %job.experiment, job = %job.name, error = %message, "launch failed");
                if let Err(write_err) = append_note(&job.files.stderr, &format!("launch failed: {}", message)) {
                    warn!(job = %job.name, error = %write_err, "could not record launch failure");
                }
                log_event(&job, "launch_failed", json!({ "error": message }));
                self.finished.push(JobReport {
                    experiment: job.experiment,
                    name: job.name,
                    pid: None,
                    started_at,
                    finished_at: Utc::now(),
                    elapsed: Duration::ZERO,
                    termination: Termination::LaunchFailed(message),
                    outcome: Outcome::UnclassifiedError,
                });
                false
            }
        }
    }

    /// One polling tick: reaps exited processes and kills any that ran past
    /// the timeout. Returns the number still active.
    pub fn poll(&mut self) -> usize {
        self.observe();
        let timeout = self.config.timeout;
        let mut still_active = Vec::with_capacity(self.active.len());
        for mut record in std::mem::take(&mut self.active) {
            match record.child.try_wait() {
                Ok(Some(status)) => {
                    let report = finish(record, Termination::Exited(status.code()));
                    self.finished.push(report);
                }
                Ok(None) if record.elapsed() > timeout => {
                    warn!(
                        experiment = %record.job.experiment,
                        job = %record.job.name,
                        pid = record.pid,
                        timeout_secs = timeout.as_secs_f64(),
                        "job reached maximum allowed time, killing"
                    );
                    if let Err(e) = record.child.kill() {
                        warn!(job = %record.job.name, error = %e, "kill failed");
                    }
                    if let Err(e) = record.child.wait() {
                        warn!(job = %record.job.name, error = %e, "wait after kill failed");
                    }
                    let note = format!("{} {}", TIMEOUT_MARKER, timeout.as_secs_f64());
                    if let Err(e) = append_note(&record.job.files.stderr, &note) {
                        warn!(job = %record.job.name, error = %e, "could not record timeout");
                    }
                    let report = finish(record, Termination::TimedOut);
                    self.finished.push(report);
                }
                Ok(None) => still_active.push(record),
                Err(e) => {
                    warn!(job = %record.job.name, error = %e, "try_wait failed");
                    let report = finish(record, Termination::WaitFailed(e.to_string()));
                    self.finished.push(report);
                }
            }
        }
        self.active = still_active;
        self.active.len()
    }

    /// Blocks until fewer than `max_concurrent` jobs are active.
    pub fn wait_for_slot(&mut self) {
        let mut notified = false;
        while self.poll() >= self.config.max_concurrent {
            if !notified {
                debug!(active = self.active.len(), "waiting for a free slot");
                notified = true;
            }
            thread::sleep(self.config.launch_poll);
        }
    }

    /// Blocks until no job is active, reporting only when the count moves.
    pub fn drain(&mut self) {
        let mut previous = None;
        loop {
            let active = self.poll();
            if active == 0 {
                break;
            }
            if previous != Some(active) {
                info!(active, "still waiting for jobs to finish");
                previous = Some(active);
            }
            thread::sleep(self.config.drain_poll);
        }
        info!(launched = self.launched, "all jobs finished");
    }

    /// Launches every job in order under the concurrency ceiling, then drains.
    pub fn run(&mut self, jobs: impl IntoIterator<Item = JobSpec>) -> Vec<JobReport> {
        for job in jobs {
            self.launch(job);
            self.wait_for_slot();
        }
        self.drain();
        self.take_finished()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for record in &mut self.active {
            let _ = record.child.kill();
            let _ = record.child.wait();
        }
    }
}

fn spawn(job: &JobSpec) -> Result<Child> {
    let stdout = File::create(&job.files.stdout)?;
    let stderr = File::create(&job.files.stderr)?;
    let child = Command::new(&job.program)
        .args(&job.args)
        .current_dir(&job.work_dir)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .spawn()?;
    Ok(child)
}

fn finish(record: RunRecord, termination: Termination) -> JobReport {
    let elapsed = record.elapsed();
    let outcome = match &termination {
        Termination::TimedOut => Outcome::TimedOut,
        Termination::LaunchFailed(_) | Termination::WaitFailed(_) => Outcome::UnclassifiedError,
        Termination::Exited(_) => classify_job(&record.job.files),
    };
    let (event, exit_code) = match &termination {
        Termination::Exited(code) => ("finished", *code),
        Termination::TimedOut => ("timed_out", None),
        _ => ("wait_failed", None),
    };
    info!(
        experiment = %record.job.experiment,
        job = %record.job.name,
        outcome = outcome.as_str(),
        elapsed_secs = elapsed.as_secs_f64(),
        "job ended"
    );
    log_event(
        &record.job,
        event,
        json!({
            "pid": record.pid,
            "exit_code": exit_code,
            "elapsed_secs": elapsed.as_secs_f64(),
            "outcome": outcome.as_str(),
        }),
    );
    JobReport {
        experiment: record.job.experiment,
        name: record.job.name,
        pid: Some(record.pid),
        started_at: record.started_at,
        finished_at: Utc::now(),
        elapsed,
        termination,
        outcome,
    }
}

fn append_note(path: &std::path::Path, note: &str) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", note)?;
    Ok(())
}

fn log_event(job: &JobSpec, event: &str, fields: serde_json::Value) {
    if let Some(log) = &job.run_log {
        if let Err(e) = append_event(log, event, &job.name, fields) {
            warn!(job = %job.name, error = %e, "could not append to run log");
        }
    }
}

/// Removes stale per-job output before a forced re-run. Returns how many
/// files could not be removed; each is logged.
pub fn clear_job_files(files: &JobFiles) -> usize {
    let mut failed = 0;
    for path in [&files.stdout, &files.stderr, &files.diagnostic] {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(file = %path.display(), error = %e, "could not clear stale job output");
                failed += 1;
            }
        }
    }
    failed
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::ledger::read_events;
    use std::path::Path;

    fn shell_job(dir: &Path, name: &str, script: &str) -> JobSpec {
        JobSpec {
            experiment: "t".to_string(),
            name: name.to_string(),
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), script.to_string()],
            work_dir: dir.to_path_buf(),
            files: JobFiles::new(dir, name),
            run_log: Some(dir.join("run_log.jsonl")),
        }
    }

    fn fast_config(max_concurrent: usize, timeout: Duration) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent,
            timeout,
            launch_poll: Duration::from_millis(10),
            drain_poll: Duration::from_millis(20),
        }
    }

    #[test]
    fn never_exceeds_concurrency_ceiling() {
        let dir = tempfile::tempdir().expect("tempdir");
        for max in [1usize, 2, 3] {
            let mut scheduler = Scheduler::new(fast_config(max, Duration::from_secs(30)));
            let jobs: Vec<JobSpec> = (0..7)
                .map(|i| shell_job(dir.path(), &format!("m{}j{}", max, i), "sleep 0.1"))
                .collect();
            let reports = scheduler.run(jobs);
            assert_eq!(reports.len(), 7);
            assert!(
                scheduler.peak_active() <= max,
                "peak {} exceeded {}",
                scheduler.peak_active(),
                max
            );
            assert!(reports.iter().all(|r| r.outcome == Outcome::Success));
        }
    }

    #[test]
    fn hung_job_is_killed_and_marked_timed_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut scheduler = Scheduler::new(fast_config(2, Duration::from_millis(200)));
        let reports = scheduler.run(vec![
            shell_job(dir.path(), "hung", "exec sleep 30"),
            shell_job(dir.path(), "quick", "true"),
        ]);
        let hung = reports.iter().find(|r| r.name == "hung").expect("hung report");
        assert_eq!(hung.termination, Termination::TimedOut);
        assert_eq!(hung.outcome, Outcome::TimedOut);
        assert!(hung.elapsed < Duration::from_secs(10));

        let files = JobFiles::new(dir.path(), "hung");
        let note = fs::read_to_string(&files.stderr).expect("stderr");
        assert!(note.contains(TIMEOUT_MARKER));
        assert_eq!(classify_job(&files), Outcome::TimedOut);

        let quick = reports.iter().find(|r| r.name == "quick").expect("quick report");
        assert_eq!(quick.outcome, Outcome::Success);
    }

    #[test]
    fn clearing_job_files_reports_what_it_could_not_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = JobFiles::new(dir.path(), "old");
        fs::write(&files.stdout, "stale").expect("stdout");
        fs::create_dir(&files.stderr).expect("dir in place of stderr");
        assert_eq!(clear_job_files(&files), 1);
        assert!(!files.stdout.exists());
        assert!(files.stderr.is_dir());
        assert_eq!(clear_job_files(&JobFiles::new(dir.path(), "never")), 0);
    }

    #[test]
    fn outcomes_come_from_diagnostic_text_not_exit_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut scheduler = Scheduler::new(fast_config(4, Duration::from_secs(30)));
        let reports = scheduler.run(vec![
            shell_job(dir.path(), "floor", "echo 'dt below floor' > floor_stde.txt; exit 0"),
            shell_job(dir.path(), "crash", "echo boom >&2; exit 3"),
            shell_job(dir.path(), "ok", "echo output; exit 1"),
        ]);
        let by_name = |n: &str| reports.iter().find(|r| r.name == n).expect("report");
        assert_eq!(by_name("floor").outcome, Outcome::TimeStepFloor);
        assert_eq!(by_name("crash").outcome, Outcome::UnclassifiedError);
        assert_eq!(by_name("crash").termination, Termination::Exited(Some(3)));
        assert_eq!(by_name("ok").outcome, Outcome::Success);
        let stdout = fs::read_to_string(dir.path().join("ok_stdo.txt")).expect("stdout");
        assert_eq!(stdout.trim(), "output");
    }

    #[test]
    fn launch_failure_does_not_stop_the_batch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut scheduler = Scheduler::new(fast_config(1, Duration::from_secs(30)));
        let mut missing = shell_job(dir.path(), "missing", "");
        missing.program = dir.path().join("no-such-binary");
        let reports = scheduler.run(vec![missing, shell_job(dir.path(), "after", "true")]);
        assert_eq!(reports.len(), 2);
        let failed = reports.iter().find(|r| r.name == "missing").expect("missing");
        assert!(matches!(failed.termination, Termination::LaunchFailed(_)));
        assert_eq!(scheduler.launched(), 1);

        let events = read_events(&dir.path().join("run_log.jsonl")).expect("events");
        let kinds: Vec<&str> = events.iter().filter_map(|e| e["event"].as_str()).collect();
        assert_eq!(kinds, vec!["launch_failed", "started", "finished"]);
    }
}
