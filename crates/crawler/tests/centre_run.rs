//! End-to-end centre runs against a temp-file SQLite store.

use chrono::{Duration, Utc};
use crawler::config::{CentreConfig, CompiledCentre, DEFAULT_BARCODE_REGEX};
use crawler::storage::SqliteSampleStore;
use crawler::{Centre, FileError};
use crawler_db::CrawlerDb;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const HEADER: &str = "Root Sample ID,RNA ID,Result,Date Tested,Lab ID,CH1-Target,CH1-Result,CH1-Cq\n";

struct Fixture {
    _tmp: TempDir,
    root: PathBuf,
    centre: CompiledCentre,
    store: SqliteSampleStore,
}

impl Fixture {
    async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        fs::create_dir_all(root.join("downloads").join("ALDP")).unwrap();

        let centre = CentreConfig {
            name: "Alderley".to_string(),
            prefix: "ALDP".to_string(),
            lab_id_default: "AP".to_string(),
            barcode_field: "RNA ID".to_string(),
            barcode_regex: Some(DEFAULT_BARCODE_REGEX.to_string()),
            backups_folder: root.join("backups").join("ALDP"),
            file_regex: r"^AP_.*\.csv$".to_string(),
            file_names_to_ignore: Vec::new(),
            biomek_labware_class: "KingFisher_96_2ml".to_string(),
        }
        .compile()
        .unwrap();

        let store = SqliteSampleStore::new(CrawlerDb::open(root.join("samples.db")).await.unwrap());
        Self {
            _tmp: tmp,
            root,
            centre,
            store,
        }
    }

    fn write_file(&self, name: &str, content: &str) {
        fs::write(self.root.join("downloads").join("ALDP").join(name), content).unwrap();
    }

    fn archive_entries(&self, dir: &str) -> Vec<String> {
        list(&self.root.join("backups").join("ALDP").join(dir))
    }

    fn centre(&self) -> Centre<'_> {
        Centre::new(&self.centre, self.root.join("downloads"), &self.store)
    }
}

fn list(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}

fn clean_file() -> String {
    format!(
        "{HEADER}\
         MCM001,DN123_A01,Positive,2020-04-23 14:40:00 UTC,AP,ORF1ab,Positive,24.98\n\
         MCM002,DN123_A02,Negative,2020-04-23 14:40:00 UTC,,,,\n"
    )
}

#[tokio::test]
async fn test_rerun_over_unchanged_directory_is_a_no_op() {
    let fx = Fixture::new().await;
    fx.write_file("AP_1.csv", &clean_file());
    let now = Utc::now();

    let first = fx.centre().process_files(now).await.unwrap();
    assert_eq!(first.not_yet_processed, 1);
    assert_eq!(first.documents_inserted, 2);
    assert!(first.files[0].errors.is_empty());
    assert_eq!(fx.archive_entries("successes").len(), 1);
    assert!(fx.archive_entries("errors").is_empty());

    let second = fx.centre().process_files(now + Duration::minutes(5)).await.unwrap();
    assert_eq!(second.processed_with_success, 1);
    assert_eq!(second.not_yet_processed, 0);
    assert_eq!(second.documents_inserted, 0);
    assert_eq!(fx.archive_entries("successes").len(), 1);

    let imports = fx.store.db().import_records_for_centre("Alderley").await.unwrap();
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].number_of_records, 2);
    assert_eq!(fx.store.db().all_samples().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_changed_content_is_processed_again_and_archives_replaced_samples() {
    let fx = Fixture::new().await;
    fx.write_file("AP_1.csv", &clean_file());
    let now = Utc::now();
    fx.centre().process_files(now).await.unwrap();

    // Same name, one byte different.
    fx.write_file("AP_1.csv", &clean_file().replace("24.98", "24.99"));
    let rerun = fx.centre().process_files(now + Duration::minutes(5)).await.unwrap();

    assert_eq!(rerun.not_yet_processed, 1);
    assert_eq!(rerun.documents_inserted, 2);
    assert_eq!(rerun.files[0].errors, Vec::<FileError>::new());
    assert_eq!(fx.archive_entries("successes").len(), 2);

    assert_eq!(fx.store.db().sample_history("MCM001").await.unwrap().len(), 1);
    assert_eq!(fx.store.db().sample_history("MCM002").await.unwrap().len(), 1);
    assert_eq!(fx.store.db().all_samples().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_missing_headers_go_to_errors_archive_with_import_record() {
    let fx = Fixture::new().await;
    fx.write_file("AP_bad.csv", "Root Sample ID,Result\nMCM001,Positive\n");
    fx.write_file("AP_good.csv", &clean_file());
    let now = Utc::now();

    let summary = fx.centre().process_files(now).await.unwrap();
    assert_eq!(summary.not_yet_processed, 2);
    assert_eq!(summary.documents_inserted, 2);
    assert_eq!(summary.failed, 0);

    let errors = fx.archive_entries("errors");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("_AP_bad.csv_"));
    assert_eq!(fx.archive_entries("successes").len(), 1);

    let imports = fx.store.db().import_records_for_centre("Alderley").await.unwrap();
    let bad = imports.iter().find(|r| r.csv_file_used == "AP_bad.csv").unwrap();
    assert_eq!(bad.number_of_records, 0);
    assert_eq!(bad.errors, vec!["RNA ID, Date Tested missing in CSV file".to_string()]);

    let again = fx.centre().process_files(now + Duration::minutes(5)).await.unwrap();
    assert_eq!(again.processed_with_error, 1);
    assert_eq!(again.processed_with_success, 1);
    assert_eq!(fx.store.db().import_records_for_centre("Alderley").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_duplicate_rows_are_counted_and_file_goes_to_errors() {
    let fx = Fixture::new().await;
    let content = format!(
        "{HEADER}\
         MCM001,DN123_A01,Positive,2020-04-23 14:40:00 UTC,AP,,,\n\
         MCM002,DN123_A02,Negative,2020-04-23 14:40:00 UTC,AP,,,\n\
         MCM002,DN123_A02,Negative,2020-04-23 14:40:00 UTC,AP,,,\n"
    );
    fx.write_file("AP_dup.csv", &content);

    let summary = fx.centre().process_files(Utc::now()).await.unwrap();
    let outcome = &summary.files[0];
    assert_eq!(outcome.inserted, 2);
    assert_eq!(outcome.errors.len(), 1);
    assert!(matches!(outcome.errors[0], FileError::WriteErrors { count: 1, .. }));
    assert_eq!(fx.archive_entries("errors").len(), 1);
    assert!(fx.archive_entries("successes").is_empty());
}

#[tokio::test]
async fn test_value_warnings_do_not_block_rows() {
    let fx = Fixture::new().await;
    let content = format!(
        "{HEADER}\
         MCM001,DN123_A01,Maybe,2020-04-23 14:40:00 UTC,AP,ORF1ab,Positive,not-a-number\n\
         MCM002,garbage,Negative,2020-04-23 14:40:00 UTC,AP,,,\n"
    );
    fx.write_file("AP_warn.csv", &content);

    let summary = fx.centre().process_files(Utc::now()).await.unwrap();
    let outcome = &summary.files[0];
    assert_eq!(outcome.inserted, 2);
    assert_eq!(outcome.errors.len(), 3);
    assert_eq!(fx.archive_entries("errors").len(), 1);

    let stored = fx.store.db().samples_by_root_ids(&["MCM001".to_string()]).await.unwrap();
    assert_eq!(stored[0].channels[0].cq, None);
    assert_eq!(stored[0].result, "Maybe");
}
