//! Per-file processing state.

use crate::checksum;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

pub const ERRORS_DIR: &str = "errors";
pub const SUCCESSES_DIR: &str = "successes";

/// Where a result file stands relative to earlier runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FileState {
    #[default]
    Unchecked,
    /// Named in the centre's ignore list
    Blacklisted,
    /// Same content already archived under `errors/`
    ProcessedWithError,
    /// Same content already archived under `successes/`
    ProcessedWithSuccess,
    NotYetProcessed,
}

impl FileState {
    /// Only new files are ingested.
    pub fn should_process(self) -> bool {
        matches!(self, Self::NotYetProcessed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unchecked => "unchecked",
            Self::Blacklisted => "blacklisted",
            Self::ProcessedWithError => "processed_with_error",
            Self::ProcessedWithSuccess => "processed_with_success",
            Self::NotYetProcessed => "not_yet_processed",
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `<backups_folder>/errors`
pub fn errors_dir(backups_folder: &Path) -> PathBuf {
    backups_folder.join(ERRORS_DIR)
}

/// `<backups_folder>/successes`
pub fn successes_dir(backups_folder: &Path) -> PathBuf {
    backups_folder.join(SUCCESSES_DIR)
}

/// Decide a file's state. First match wins: ignore list, errors archive,
/// successes archive, otherwise new.
///
/// `digest` is only computed when the ignore list does not already decide.
pub fn classify(
    file_name: &str,
    file_path: &Path,
    backups_folder: &Path,
    ignore_list: &[String],
) -> io::Result<(FileState, Option<String>)> {
    if ignore_list.iter().any(|ignored| ignored == file_name) {
        return Ok((FileState::Blacklisted, None));
    }

    let digest = checksum::checksum(file_path)?;

    let state = if checksum::matches(&digest, &errors_dir(backups_folder))? {
        FileState::ProcessedWithError
    } else if checksum::matches(&digest, &successes_dir(backups_folder))? {
        FileState::ProcessedWithSuccess
    } else {
        FileState::NotYetProcessed
    };

    Ok((state, Some(digest)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        file: PathBuf,
        backups: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("AP_sanger_report_200503_2338.csv");
        fs::write(&file, "Root Sample ID,RNA ID,Result,Date Tested\n").unwrap();
        let backups = tmp.path().join("backups");
        fs::create_dir_all(errors_dir(&backups)).unwrap();
        fs::create_dir_all(successes_dir(&backups)).unwrap();
        Fixture { _tmp: tmp, file, backups }
    }

    fn archive(fx: &Fixture, dir: PathBuf) {
        let digest = checksum::checksum(&fx.file).unwrap();
        let name = checksum::backup_name("AP_sanger_report_200503_2338.csv", &digest, Utc::now());
        fs::copy(&fx.file, dir.join(name)).unwrap();
    }

    #[test]
    fn test_new_file() {
        let fx = fixture();
        let (state, digest) = classify("AP_sanger_report_200503_2338.csv", &fx.file, &fx.backups, &[]).unwrap();
        assert_eq!(state, FileState::NotYetProcessed);
        assert!(digest.is_some());
        assert!(state.should_process());
    }

    #[test]
    fn test_ignore_list_wins() {
        let fx = fixture();
        archive(&fx, errors_dir(&fx.backups));
        let ignore = vec!["AP_sanger_report_200503_2338.csv".to_string()];
        let (state, digest) = classify("AP_sanger_report_200503_2338.csv", &fx.file, &fx.backups, &ignore).unwrap();
        assert_eq!(state, FileState::Blacklisted);
        assert!(digest.is_none());
    }

    #[test]
    fn test_errors_archive_checked_before_successes() {
        let fx = fixture();
        archive(&fx, successes_dir(&fx.backups));
        archive(&fx, errors_dir(&fx.backups));
        let (state, _) = classify("AP_sanger_report_200503_2338.csv", &fx.file, &fx.backups, &[]).unwrap();
        assert_eq!(state, FileState::ProcessedWithError);
    }

    #[test]
    fn test_changed_content_is_new_again() {
        let fx = fixture();
        archive(&fx, successes_dir(&fx.backups));
        let (state, _) = classify("AP_sanger_report_200503_2338.csv", &fx.file, &fx.backups, &[]).unwrap();
        assert_eq!(state, FileState::ProcessedWithSuccess);

        fs::write(&fx.file, "Root Sample ID,RNA ID,Result,Date Tested\n ").unwrap();
        let (state, _) = classify("AP_sanger_report_200503_2338.csv", &fx.file, &fx.backups, &[]).unwrap();
        assert_eq!(state, FileState::NotYetProcessed);
    }
}
