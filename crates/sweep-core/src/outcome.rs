use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Appended to a job's diagnostic file when the scheduler kills it.
pub const TIMEOUT_MARKER: &str = "Reached max allowed time";

const FLOOR_MARKER: &str = "floor";
const QST_MARKER: &str = "Qst";
const MERGER_MARKER: &str = "merger";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    NotStarted,
    Success,
    TimeStepFloor,
    StabilityError,
    RejectedMergerHistory,
    UnclassifiedError,
    TimedOut,
}

impl Outcome {
    /// Numeric code used in success tables.
    pub fn code(self) -> i8 {
        match self {
            Outcome::NotStarted => -1,
            Outcome::Success => 0,
            Outcome::TimeStepFloor => 1,
            Outcome::StabilityError => 2,
            Outcome::RejectedMergerHistory => 3,
            Outcome::UnclassifiedError => 4,
            Outcome::TimedOut => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::NotStarted => "not_started",
            Outcome::Success => "success",
            Outcome::TimeStepFloor => "time_step_floor",
            Outcome::StabilityError => "stability_error",
            Outcome::RejectedMergerHistory => "rejected_merger_history",
            Outcome::UnclassifiedError => "unclassified_error",
            Outcome::TimedOut => "timed_out",
        }
    }

    pub fn is_failure(self) -> bool {
        !matches!(self, Outcome::NotStarted | Outcome::Success)
    }
}

/// Classifies the text of a diagnostic stream that is known to exist.
pub fn classify_text(contents: &str) -> Outcome {
    if contents.is_empty() {
        Outcome::Success
    } else if contents.contains(FLOOR_MARKER) {
        Outcome::TimeStepFloor
    } else if contents.contains(QST_MARKER) {
        Outcome::StabilityError
    } else if contents.contains(MERGER_MARKER) {
        Outcome::RejectedMergerHistory
    } else {
        Outcome::UnclassifiedError
    }
}

/// Reads a diagnostic file and classifies it. A missing file means the job
/// never started; an unreadable one is an unclassified error.
pub fn classify(path: &Path) -> Outcome {
    match fs::read(path) {
        Ok(bytes) => classify_text(&String::from_utf8_lossy(&bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Outcome::NotStarted,
        Err(_) => Outcome::UnclassifiedError,
    }
}

pub fn was_timed_out(path: &Path) -> bool {
    fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).contains(TIMEOUT_MARKER))
        .unwrap_or(false)
}

/// Like [`classify`], but a stream carrying the scheduler's timeout note is
/// `TimedOut` whatever else the job managed to write before it was killed.
pub fn classify_with_timeout(path: &Path) -> Outcome {
    if was_timed_out(path) {
        Outcome::TimedOut
    } else {
        classify(path)
    }
}
