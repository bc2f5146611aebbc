use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use sweep_core::Outcome;
use sweep_runner::{
    homogenize, ExperimentSummary, JobReport, LaunchSummary, RunOptions, RunnerSettings, Session,
    SettingsOverrides, Suite, Termination,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sweep", version = "0.3.0", about = "Parameter sweep launcher")]
struct Cli {
    /// Directory the suite's relative paths resolve against.
    #[arg(long, global = true, env = "SWEEP_ROOT", default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch every matching experiment and wait for all jobs.
    Run {
        suite: PathBuf,
        /// Substrings of experiment names; all experiments when omitted.
        experiments: Vec<String>,
        #[arg(long)]
        nproc: Option<usize>,
        #[arg(long, default_value_t = 0)]
        start: usize,
        #[arg(long)]
        timeout_secs: Option<f64>,
        #[arg(long)]
        overwrite: bool,
        #[arg(long)]
        json: bool,
    },
    Describe {
        suite: PathBuf,
        experiments: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    Status {
        suite: PathBuf,
        experiments: Vec<String>,
        /// Merge equal-shaped tables into one digit per experiment.
        #[arg(long)]
        homogenize: bool,
        #[arg(long)]
        json: bool,
    },
    Export {
        suite: PathBuf,
        experiment: String,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    Classify {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(&cli.root, cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_session(root: &Path, suite_path: &Path, overrides: &SettingsOverrides) -> Result<Session> {
    let suite = Suite::load(suite_path)?;
    let settings = RunnerSettings::resolve(root, &suite.runner, overrides)?;
    Ok(Session::new(suite.registry, settings))
}

fn select(session: &Session, tokens: &[String]) -> Result<Vec<String>> {
    if tokens.is_empty() {
        return Ok(session.registry.names().into_iter().map(String::from).collect());
    }
    let (found, unmatched) = session.registry.resolve(tokens);
    for token in &unmatched {
        warn!(token = %token, "no experiment matches");
    }
    if found.is_empty() {
        return Err(anyhow!("no experiment matches {}", tokens.join(", ")));
    }
    Ok(found)
}

fn run_command(root: &Path, command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            suite,
            experiments,
            nproc,
            start,
            timeout_secs,
            overwrite,
            json,
        } => {
            let overrides = SettingsOverrides {
                max_concurrent: nproc,
                timeout_secs,
            };
            let mut session = open_session(root, &suite, &overrides)?;
            let names = select(&session, &experiments)?;
            let options = RunOptions {
                start_at: start,
                overwrite,
            };
            let result = session.run_batch(&names, options)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "launched": result.launched.iter().map(launch_to_json).collect::<Vec<_>>(),
                    "refused": result.refused,
                    "jobs": result.reports.iter().map(report_to_json).collect::<Vec<_>>(),
                    "peak_active": session.scheduler().peak_active()
                })));
            }
            for summary in &result.launched {
                println!(
                    "{}: submitted {}/{} jobs in {}",
                    summary.experiment,
                    summary.submitted,
                    summary.planned,
                    summary.exp_dir.display()
                );
            }
            for name in &result.refused {
                println!("{}: skipped, output already present", name);
            }
            for report in &result.reports {
                println!(
                    "{} {} {}",
                    report.name,
                    report.outcome.as_str(),
                    termination_str(&report.termination)
                );
            }
        }
        Commands::Describe {
            suite,
            experiments,
            json,
        } => {
            let mut session = open_session(root, &suite, &SettingsOverrides::default())?;
            let mut summaries = Vec::new();
            for name in select(&session, &experiments)? {
                summaries.push(session.describe(&name)?);
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "experiments": summaries.iter().map(summary_to_json).collect::<Vec<_>>()
                })));
            }
            for summary in &summaries {
                print_summary(summary);
            }
        }
        Commands::Status {
            suite,
            experiments,
            homogenize: merge,
            json,
        } => {
            let mut session = open_session(root, &suite, &SettingsOverrides::default())?;
            let mut tables = Vec::new();
            for name in select(&session, &experiments)? {
                tables.push(session.success_table(&name)?);
            }
            let merged = if merge { Some(homogenize(&tables)?) } else { None };
            if json {
                let tables = tables
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(Some(json!({
                    "ok": true,
                    "command": "status",
                    "tables": tables,
                    "homogenized": merged
                })));
            }
            match merged {
                Some(rows) => {
                    let order: Vec<&str> = tables.iter().map(|t| t.experiment.as_str()).collect();
                    println!("experiments: {}", order.join(" "));
                    for row in rows {
                        println!("{}", row);
                    }
                }
                None => {
                    for table in &tables {
                        println!("{} {:?}", table.experiment, table.shape);
                        for row in table.render() {
                            println!("{}", row);
                        }
                    }
                }
            }
        }
        Commands::Export {
            suite,
            experiment,
            out,
            json,
        } => {
            let mut session = open_session(root, &suite, &SettingsOverrides::default())?;
            let out = out.unwrap_or_else(|| PathBuf::from(format!("runExperiment_{}.txt", experiment)));
            let count = session.export_batch(&experiment, &out)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "export",
                    "experiment": experiment,
                    "out": out.display().to_string(),
                    "jobs": count
                })));
            }
            println!("wrote {} commands to {}", count, out.display());
        }
        Commands::Classify { path, json } => {
            let outcome = sweep_core::classify_with_timeout(&path);
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "classify",
                    "path": path.display().to_string(),
                    "outcome": outcome.as_str(),
                    "code": outcome.code(),
                    "timed_out": outcome == Outcome::TimedOut
                })));
            }
            println!("{} ({})", outcome.as_str(), outcome.code());
            if outcome == Outcome::NotStarted {
                println!("no diagnostic file at {}", path.display());
            }
        }
    }
    Ok(None)
}

fn termination_str(termination: &Termination) -> String {
    match termination {
        Termination::Exited(Some(code)) => format!("exit={}", code),
        Termination::Exited(None) => "exit=signal".to_string(),
        Termination::TimedOut => "timed_out".to_string(),
        Termination::LaunchFailed(e) => format!("launch_failed: {}", e),
        Termination::WaitFailed(e) => format!("wait_failed: {}", e),
    }
}

fn launch_to_json(summary: &LaunchSummary) -> Value {
    json!({
        "experiment": summary.experiment,
        "exp_dir": summary.exp_dir.display().to_string(),
        "planned": summary.planned,
        "submitted": summary.submitted,
        "plan_manifest": summary.plan_manifest.display().to_string()
    })
}

fn report_to_json(report: &JobReport) -> Value {
    json!({
        "experiment": report.experiment,
        "job": report.name,
        "pid": report.pid,
        "started_at": report.started_at.to_rfc3339(),
        "finished_at": report.finished_at.to_rfc3339(),
        "elapsed_secs": report.elapsed.as_secs_f64(),
        "termination": termination_str(&report.termination),
        "outcome": report.outcome.as_str(),
        "code": report.outcome.code()
    })
}

fn summary_to_json(summary: &ExperimentSummary) -> Value {
    json!({
        "experiment": summary.experiment,
        "exp_dir": summary.exp_dir.display().to_string(),
        "executable": summary.executable.display().to_string(),
        "total_runs": summary.total_runs,
        "dims": summary.dims.iter().map(|d| json!({
            "slots": d.slots,
            "cov": d.cov,
            "len": d.len
        })).collect::<Vec<_>>(),
        "jobs": summary.names,
        "covariation_issues": summary.issues.iter().map(|i| json!({
            "tag": i.tag,
            "lengths": i.lengths
        })).collect::<Vec<_>>(),
        "completed": summary.completed
    })
}

fn print_summary(summary: &ExperimentSummary) {
    println!("experiment: {}", summary.experiment);
    println!("exp_dir: {}", summary.exp_dir.display());
    println!("executable: {}", summary.executable.display());
    println!("total_runs: {}", summary.total_runs);
    for dim in &summary.dims {
        let group = if dim.cov == 0 {
            String::new()
        } else {
            format!(" (cov {})", dim.cov)
        };
        println!("  {} x{}{}", dim.slots.join(","), dim.len, group);
    }
    for issue in &summary.issues {
        let lengths: Vec<String> = issue
            .lengths
            .iter()
            .map(|(slot, n)| format!("{}={}", slot, n))
            .collect();
        println!(
            "  covariation tag {} has unequal lengths: {}",
            issue.tag,
            lengths.join(" ")
        );
    }
    if summary.completed {
        println!("  output already present");
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Describe { json, .. }
        | Commands::Status { json, .. }
        | Commands::Export { json, .. }
        | Commands::Classify { json, .. } => *json,
    }
}
