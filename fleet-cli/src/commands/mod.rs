pub mod cache;
pub mod detect;
pub mod diff;
pub mod plan;
pub mod sync;

use fleet_sync::RepoFailure;

use crate::RunStatus;

/// Status for a planning command given the repositories that dropped out.
pub(crate) fn status_for(failures: &[RepoFailure], detection_failed_for_all: bool) -> RunStatus {
    if detection_failed_for_all {
        RunStatus::DetectionFailed
    } else if !failures.is_empty() {
        RunStatus::PartialFailure
    } else {
        RunStatus::Success
    }
}

/// One line per repository that never reached planning output.
pub(crate) fn print_failures(failures: &[RepoFailure]) {
    use colored::Colorize;

    for f in failures {
        eprintln!(
            "{} {} ({}): {}",
            "✗".red().bold(),
            f.repo,
            f.path.display(),
            f.error
        );
    }
}
