use anyhow::Result;
use std::path::{Path, PathBuf};
use sweep_core::{classify, classify_with_timeout, Outcome};
use walkdir::WalkDir;

pub const COMPLETION_MARKER_SUFFIX: &str = "comment.txt";

pub fn experiment_dir(analysis_root: &Path, experiment: &str) -> PathBuf {
    analysis_root.join(experiment)
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Per-job files inside an experiment directory. The executable writes its
/// own `<job>_stde.txt`; the scheduler captures the process's stderr in
/// `<job>_stde_aux.txt` so the two never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFiles {
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub diagnostic: PathBuf,
}

impl JobFiles {
    pub fn new(exp_dir: &Path, job: &str) -> Self {
        Self {
            stdout: exp_dir.join(format!("{}_stdo.txt", job)),
            stderr: exp_dir.join(format!("{}_stde_aux.txt", job)),
            diagnostic: exp_dir.join(format!("{}_stde.txt", job)),
        }
    }
}

/// A timeout note in the captured stderr wins over anything else. Otherwise
/// the executable's own diagnostic file decides, falling back to the
/// captured stderr when the executable never wrote one.
pub fn classify_job(files: &JobFiles) -> Outcome {
    match classify_with_timeout(&files.stderr) {
        Outcome::TimedOut => Outcome::TimedOut,
        captured => match classify(&files.diagnostic) {
            Outcome::NotStarted => captured,
            other => other,
        },
    }
}

pub fn completion_markers(exp_dir: &Path) -> Vec<PathBuf> {
    if !exp_dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(exp_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|n| n.ends_with(COMPLETION_MARKER_SUFFIX))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect()
}

pub fn has_completion_markers(exp_dir: &Path) -> bool {
    !completion_markers(exp_dir).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use sweep_core::TIMEOUT_MARKER;

    #[test]
    fn job_files_follow_naming_convention() {
        let files = JobFiles::new(Path::new("/data/analysis/rf1"), "rf1ab");
        assert_eq!(files.stdout, PathBuf::from("/data/analysis/rf1/rf1ab_stdo.txt"));
        assert_eq!(files.stderr, PathBuf::from("/data/analysis/rf1/rf1ab_stde_aux.txt"));
        assert_eq!(files.diagnostic, PathBuf::from("/data/analysis/rf1/rf1ab_stde.txt"));
    }

    #[test]
    fn markers_only_count_top_level_comment_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(!has_completion_markers(dir.path()));
        fs::create_dir(dir.path().join("nested")).expect("nested");
        fs::write(dir.path().join("nested").join("xcomment.txt"), "").expect("nested marker");
        fs::write(dir.path().join("rf1a_stdo.txt"), "").expect("stdo");
        assert!(!has_completion_markers(dir.path()));
        fs::write(dir.path().join("rf1a_comment.txt"), "done").expect("marker");
        assert_eq!(completion_markers(dir.path()).len(), 1);
        assert!(!has_completion_markers(&dir.path().join("missing")));
    }

    #[test]
    fn classify_job_prefers_timeout_then_diagnostic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = JobFiles::new(dir.path(), "j");
        assert_eq!(classify_job(&files), Outcome::NotStarted);

        fs::write(&files.stderr, "").expect("aux");
        assert_eq!(classify_job(&files), Outcome::Success);

        fs::write(&files.diagnostic, "Qst went negative").expect("diag");
        assert_eq!(classify_job(&files), Outcome::StabilityError);

        fs::write(&files.stderr, format!("{} 10\n", TIMEOUT_MARKER)).expect("aux");
        assert_eq!(classify_job(&files), Outcome::TimedOut);
    }
}
