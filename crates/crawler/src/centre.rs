//! Centre run loop: list, classify, ingest, back up, record.

use crate::checksum;
use crate::config::CompiledCentre;
use crate::csv_file;
use crate::error::{FileError, Result};
use crate::file_state::{self, FileState};
use crate::sample_writer::SampleWriter;
use crate::storage::SampleStore;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Counts for one centre run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CentreRunSummary {
    pub centre: String,
    /// Files matching the centre's file regex
    pub files_discovered: u64,
    /// Files in the ignore list
    pub blacklisted: u64,
    /// Files already archived under `errors/`
    pub processed_with_error: u64,
    /// Files already archived under `successes/`
    pub processed_with_success: u64,
    /// Files ingested in this run
    pub not_yet_processed: u64,
    /// Files that could not be classified or processed
    pub failed: u64,
    /// Documents inserted across all ingested files
    pub documents_inserted: u64,
    /// Outcome of each ingested file, in processing order
    pub files: Vec<FileOutcome>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl CentreRunSummary {
    fn count_state(&mut self, state: FileState) {
        match state {
            FileState::Blacklisted => self.blacklisted += 1,
            FileState::ProcessedWithError => self.processed_with_error += 1,
            FileState::ProcessedWithSuccess => self.processed_with_success += 1,
            FileState::NotYetProcessed => self.not_yet_processed += 1,
            FileState::Unchecked => {}
        }
    }
}

/// What happened to one ingested file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub file_name: String,
    pub inserted: usize,
    pub errors: Vec<FileError>,
    /// Archive copy, when the backup succeeded
    pub backup: Option<PathBuf>,
}

/// One result file on its way through ingestion.
pub struct CentreFile<'a> {
    centre: &'a CompiledCentre,
    file_name: String,
    path: PathBuf,
    digest: String,
}

impl<'a> CentreFile<'a> {
    pub fn new(centre: &'a CompiledCentre, file_name: impl Into<String>, path: impl Into<PathBuf>, digest: String) -> Self {
        Self {
            centre,
            file_name: file_name.into(),
            path: path.into(),
            digest,
        }
    }

    /// Parse, validate, augment, write, back up and record the import.
    ///
    /// Only the import record write can fail the call; every other problem ends
    /// up in the outcome's error list.
    pub async fn process(&self, store: &dyn SampleStore, now: DateTime<Utc>) -> Result<FileOutcome> {
        let centre_name = &self.centre.config.name;
        let writer = SampleWriter::new(store);
        let mut errors = Vec::new();
        let mut inserted = 0;

        match csv_file::parse_path(&self.path) {
            Ok(parsed) => {
                let augmented = csv_file::augment(parsed.rows, self.centre, &self.file_name, now);
                errors.extend(augmented.warnings);

                let report = writer.write_batch(&augmented.samples, now).await;
                inserted = report.inserted;
                errors.extend(report.errors);
            }
            Err(e) => {
                warn!(centre = %centre_name, file = %self.file_name, error = %e, "File failed validation");
                errors.push(e);
            }
        }

        let backup = match self.backup(!errors.is_empty(), now) {
            Ok(path) => Some(path),
            Err(e) => {
                error!(centre = %centre_name, file = %self.file_name, error = %e, "Backup failed");
                errors.push(FileError::Critical(format!("backup failed: {e}")));
                None
            }
        };

        writer
            .record_import(centre_name, &self.file_name, inserted, &errors, now)
            .await?;

        Ok(FileOutcome {
            file_name: self.file_name.clone(),
            inserted,
            errors,
            backup,
        })
    }

    /// Copy the file into the errors or successes archive.
    fn backup(&self, has_errors: bool, now: DateTime<Utc>) -> std::io::Result<PathBuf> {
        let backups_folder = &self.centre.config.backups_folder;
        let dir = if has_errors {
            file_state::errors_dir(backups_folder)
        } else {
            file_state::successes_dir(backups_folder)
        };
        let target = dir.join(checksum::backup_name(&self.file_name, &self.digest, now));
        fs::copy(&self.path, &target)?;
        debug!(file = %self.file_name, backup = %target.display(), "File backed up");
        Ok(target)
    }
}

/// A configured centre bound to its download directory and the primary store.
pub struct Centre<'a> {
    centre: &'a CompiledCentre,
    download_root: PathBuf,
    store: &'a dyn SampleStore,
}

impl<'a> Centre<'a> {
    pub fn new(centre: &'a CompiledCentre, download_root: impl Into<PathBuf>, store: &'a dyn SampleStore) -> Self {
        Self {
            centre,
            download_root: download_root.into(),
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.centre.config.name
    }

    /// `<download_root>/<prefix>`
    pub fn download_dir(&self) -> PathBuf {
        self.centre.config.download_dir(&self.download_root)
    }

    /// Result files in the download directory, sorted by name.
    pub fn list_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(self.download_dir())? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if self.centre.matches_file_name(&name) {
                files.push((name, entry.path()));
            }
        }
        files.sort();
        Ok(files)
    }

    /// Process every new file. `Err` only when the centre's directories are
    /// unusable; per-file failures are counted in the summary.
    pub async fn process_files(&self, now: DateTime<Utc>) -> Result<CentreRunSummary> {
        let start = Instant::now();
        let backups_folder = &self.centre.config.backups_folder;
        fs::create_dir_all(file_state::errors_dir(backups_folder))?;
        fs::create_dir_all(file_state::successes_dir(backups_folder))?;

        let files = self.list_files()?;
        let mut summary = CentreRunSummary {
            centre: self.name().to_string(),
            files_discovered: files.len() as u64,
            ..Default::default()
        };
        info!(centre = %self.name(), files = files.len(), "Processing centre files");

        for (file_name, path) in files {
            let classified = file_state::classify(
                &file_name,
                &path,
                backups_folder,
                &self.centre.config.file_names_to_ignore,
            );
            let (state, digest) = match classified {
                Ok(classified) => classified,
                Err(e) => {
                    error!(centre = %self.name(), file = %file_name, error = %e, "Could not classify file");
                    summary.failed += 1;
                    continue;
                }
            };
            summary.count_state(state);

            let Some(digest) = digest.filter(|_| state.should_process()) else {
                debug!(centre = %self.name(), file = %file_name, %state, "Skipping file");
                continue;
            };

            match CentreFile::new(self.centre, &file_name, &path, digest)
                .process(self.store, now)
                .await
            {
                Ok(outcome) => {
                    info!(
                        centre = %self.name(),
                        file = %file_name,
                        inserted = outcome.inserted,
                        errors = outcome.errors.len(),
                        "File processed"
                    );
                    summary.documents_inserted += outcome.inserted as u64;
                    summary.files.push(outcome);
                }
                Err(e) => {
                    error!(centre = %self.name(), file = %file_name, error = %e, "File processing failed");
                    summary.failed += 1;
                }
            }
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            centre = %self.name(),
            new = summary.not_yet_processed,
            inserted = summary.documents_inserted,
            failed = summary.failed,
            "Centre run complete"
        );
        Ok(summary)
    }
}

/// Run every centre, or only `only` when given. A failing centre is logged and
/// the next one still runs.
pub async fn run_centres(
    centres: &[CompiledCentre],
    download_root: &Path,
    store: &dyn SampleStore,
    only: Option<&str>,
    now: DateTime<Utc>,
) -> Vec<CentreRunSummary> {
    let mut summaries = Vec::new();
    for compiled in centres.iter().filter(|c| only.map_or(true, |name| c.config.name == name)) {
        let centre = Centre::new(compiled, download_root, store);
        match centre.process_files(now).await {
            Ok(summary) => summaries.push(summary),
            Err(e) => error!(centre = %centre.name(), error = %e, "Centre run failed"),
        }
    }
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CentreConfig;
    use crate::storage::SqliteSampleStore;
    use crawler_db::CrawlerDb;
    use tempfile::TempDir;

    fn centre(tmp: &Path) -> CompiledCentre {
        CentreConfig {
            name: "Alderley".to_string(),
            prefix: "ALDP".to_string(),
            lab_id_default: "AP".to_string(),
            barcode_field: "RNA ID".to_string(),
            barcode_regex: Some(crate::config::DEFAULT_BARCODE_REGEX.to_string()),
            backups_folder: tmp.join("backups"),
            file_regex: r"^AP_.*\.csv$".to_string(),
            file_names_to_ignore: vec!["AP_ignored.csv".to_string()],
            biomek_labware_class: "KingFisher_96_2ml".to_string(),
        }
        .compile()
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_files_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let compiled = centre(tmp.path());
        let dir = tmp.path().join("downloads").join("ALDP");
        fs::create_dir_all(dir.join("AP_subdir.csv")).unwrap();
        for name in ["AP_2.csv", "AP_1.csv", "MK_1.csv", "AP_notes.txt"] {
            fs::write(dir.join(name), "x").unwrap();
        }

        let store = SqliteSampleStore::new(CrawlerDb::open(tmp.path().join("s.db")).await.unwrap());
        let centre = Centre::new(&compiled, tmp.path().join("downloads"), &store);
        let names: Vec<String> = centre.list_files().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["AP_1.csv", "AP_2.csv"]);
    }

    #[tokio::test]
    async fn test_missing_download_dir_fails_the_centre_only() {
        let tmp = TempDir::new().unwrap();
        let compiled = centre(tmp.path());
        let store = SqliteSampleStore::new(CrawlerDb::open(tmp.path().join("s.db")).await.unwrap());

        let summaries = run_centres(&[compiled], &tmp.path().join("nowhere"), &store, None, Utc::now()).await;
        assert!(summaries.is_empty());
    }

    #[tokio::test]
    async fn test_ignored_file_is_blacklisted() {
        let tmp = TempDir::new().unwrap();
        let compiled = centre(tmp.path());
        let dir = tmp.path().join("downloads").join("ALDP");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("AP_ignored.csv"), "Root Sample ID\n").unwrap();

        let store = SqliteSampleStore::new(CrawlerDb::open(tmp.path().join("s.db")).await.unwrap());
        let summary = Centre::new(&compiled, tmp.path().join("downloads"), &store)
            .process_files(Utc::now())
            .await
            .unwrap();
        assert_eq!(summary.blacklisted, 1);
        assert_eq!(summary.not_yet_processed, 0);
        assert!(store.db().import_records_for_centre("Alderley").await.unwrap().is_empty());
    }
}
