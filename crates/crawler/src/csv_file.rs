//! Result file parsing, header validation and row augmentation.
//!
//! Rows are read into [`ResultRow`]: the columns the crawler understands get
//! typed fields, anything else is carried through in `extra` untouched.

use crate::config::CompiledCentre;
use crate::error::FileError;
use chrono::{DateTime, NaiveDateTime, Utc};
use crawler_db::{Channel, Sample};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

pub const FIELD_ROOT_SAMPLE_ID: &str = "Root Sample ID";
pub const FIELD_RNA_ID: &str = "RNA ID";
pub const FIELD_RESULT: &str = "Result";
pub const FIELD_DATE_TESTED: &str = "Date Tested";
pub const FIELD_LAB_ID: &str = "Lab ID";

/// Headers every result file must carry.
pub const REQUIRED_FIELDS: [&str; 4] = [FIELD_ROOT_SAMPLE_ID, FIELD_RNA_ID, FIELD_RESULT, FIELD_DATE_TESTED];

pub const ALLOWED_RESULT_VALUES: [&str; 4] = ["Positive", "Negative", "limit of detection", "Void"];
pub const ALLOWED_CH_TARGET_VALUES: [&str; 4] = ["ORF1ab", "N gene", "S gene", "MS2"];
pub const ALLOWED_CH_RESULT_VALUES: [&str; 4] = ["Positive", "Negative", "Inconclusive", "Void"];

const MIN_CQ_VALUE: Decimal = Decimal::ZERO;
const MAX_CQ_VALUE: Decimal = Decimal::ONE_HUNDRED;

const DATE_TESTED_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S UTC", "%Y-%m-%d %H:%M:%S", "%d/%m/%Y %H:%M"];

/// Raw channel columns, before value checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawChannel {
    pub target: Option<String>,
    pub result: Option<String>,
    pub cq: Option<String>,
}

/// One data row of a result file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultRow {
    /// 1-based line in the file; the header is line 1.
    pub line_number: i64,
    pub root_sample_id: String,
    pub rna_id: String,
    pub result: String,
    pub date_tested: String,
    pub lab_id: Option<String>,
    pub channels: [RawChannel; 4],
    pub extra: BTreeMap<String, String>,
}

impl ResultRow {
    /// Value of any column by header name. `None` when the file has no such column.
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            FIELD_ROOT_SAMPLE_ID => Some(&self.root_sample_id),
            FIELD_RNA_ID => Some(&self.rna_id),
            FIELD_RESULT => Some(&self.result),
            FIELD_DATE_TESTED => Some(&self.date_tested),
            FIELD_LAB_ID => self.lab_id.as_deref(),
            other => match channel_column(other) {
                Some((index, ChannelColumn::Target)) => self.channels[index].target.as_deref(),
                Some((index, ChannelColumn::Result)) => self.channels[index].result.as_deref(),
                Some((index, ChannelColumn::Cq)) => self.channels[index].cq.as_deref(),
                None => self.extra.get(other).map(String::as_str),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelColumn {
    Target,
    Result,
    Cq,
}

/// `CH1-Target` .. `CH4-Cq`
fn channel_column(header: &str) -> Option<(usize, ChannelColumn)> {
    let rest = header.strip_prefix("CH")?;
    let (number, column) = rest.split_once('-')?;
    let index = match number {
        "1" => 0,
        "2" => 1,
        "3" => 2,
        "4" => 3,
        _ => return None,
    };
    let column = match column {
        "Target" => ChannelColumn::Target,
        "Result" => ChannelColumn::Result,
        "Cq" => ChannelColumn::Cq,
        _ => return None,
    };
    Some((index, column))
}

/// A result file that passed header validation.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub headers: Vec<String>,
    pub rows: Vec<ResultRow>,
}

/// Fail with every missing required header, or when there is no header row.
pub fn validate_headers(headers: &[String]) -> Result<(), FileError> {
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(FileError::NoHeaders);
    }

    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|required| !headers.iter().any(|h| h == *required))
        .map(|required| required.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(FileError::MissingRequiredFields(missing))
    }
}

pub fn parse_path(path: &Path) -> Result<ParsedFile, FileError> {
    let file = std::fs::File::open(path).map_err(|e| FileError::Unreadable(e.to_string()))?;
    parse(file)
}

/// Read and validate a result file.
pub fn parse<R: Read>(reader: R) -> Result<ParsedFile, FileError> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| FileError::Unreadable(e.to_string()))?
        .iter()
        .map(|h| h.to_string())
        .collect();
    validate_headers(&headers)?;

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| FileError::Unreadable(e.to_string()))?;
        let line_number = record.position().map(|p| p.line() as i64).unwrap_or_default();

        let mut row = ResultRow {
            line_number,
            ..Default::default()
        };
        for (header, value) in headers.iter().zip(record.iter()) {
            let value = value.to_string();
            match header.as_str() {
                FIELD_ROOT_SAMPLE_ID => row.root_sample_id = value,
                FIELD_RNA_ID => row.rna_id = value,
                FIELD_RESULT => row.result = value,
                FIELD_DATE_TESTED => row.date_tested = value,
                FIELD_LAB_ID => row.lab_id = Some(value),
                other => match channel_column(other) {
                    Some((index, column)) => {
                        let value = Some(value).filter(|v| !v.is_empty());
                        match column {
                            ChannelColumn::Target => row.channels[index].target = value,
                            ChannelColumn::Result => row.channels[index].result = value,
                            ChannelColumn::Cq => row.channels[index].cq = value,
                        }
                    }
                    None => {
                        row.extra.insert(other.to_string(), value);
                    }
                },
            }
        }
        rows.push(row);
    }

    debug!(rows = rows.len(), "Parsed result file");
    Ok(ParsedFile { headers, rows })
}

/// Rows turned into samples, plus file-level warnings.
#[derive(Debug, Clone, Default)]
pub struct Augmented {
    pub samples: Vec<Sample>,
    pub warnings: Vec<FileError>,
}

#[derive(Debug, Default)]
struct ValueChecks {
    barcode_mismatch: usize,
    disallowed_result: usize,
    disallowed_target: usize,
    disallowed_channel_result: usize,
    invalid_cq: usize,
}

/// Stamp provenance, split barcodes and check values. Never drops a row.
pub fn augment(rows: Vec<ResultRow>, centre: &CompiledCentre, file_name: &str, now: DateTime<Utc>) -> Augmented {
    let config = &centre.config;
    let mut checks = ValueChecks::default();
    let mut samples = Vec::with_capacity(rows.len());

    for row in rows {
        let mut sample = Sample::new(row.root_sample_id.clone(), row.rna_id.clone(), row.result.clone());

        if let Some(barcode) = row.field(&config.barcode_field) {
            match (&centre.barcode_regex, barcode.is_empty()) {
                (Some(regex), false) => {
                    if let Some(caps) = regex.captures(barcode) {
                        sample.plate_barcode = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
                        sample.coordinate = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
                    }
                }
                _ => sample.plate_barcode = barcode.to_string(),
            }
            if sample.plate_barcode.is_empty() {
                checks.barcode_mismatch += 1;
            }
        }

        if !ALLOWED_RESULT_VALUES.contains(&row.result.as_str()) {
            checks.disallowed_result += 1;
        }

        for (raw, channel) in row.channels.iter().zip(sample.channels.iter_mut()) {
            *channel = check_channel(raw, &mut checks);
        }

        sample.lab_id = row
            .lab_id
            .clone()
            .filter(|lab_id| !lab_id.is_empty())
            .unwrap_or_else(|| config.lab_id_default.clone());
        sample.date_tested = row.date_tested;
        sample.source = config.name.clone();
        sample.file_name = file_name.to_string();
        sample.line_number = row.line_number;
        sample.extra = row.extra;
        sample.created_at = now;
        sample.updated_at = now;

        samples.push(sample);
    }

    let warnings = checks.into_warnings(centre);
    for warning in &warnings {
        warn!(centre = %config.name, file = %file_name, "{warning}");
    }

    Augmented { samples, warnings }
}

fn check_channel(raw: &RawChannel, checks: &mut ValueChecks) -> Channel {
    if let Some(target) = &raw.target {
        if !ALLOWED_CH_TARGET_VALUES.contains(&target.as_str()) {
            checks.disallowed_target += 1;
        }
    }
    if let Some(result) = &raw.result {
        if !ALLOWED_CH_RESULT_VALUES.contains(&result.as_str()) {
            checks.disallowed_channel_result += 1;
        }
    }

    let cq = raw.cq.as_deref().and_then(|value| match Decimal::from_str(value.trim()) {
        Ok(cq) if (MIN_CQ_VALUE..=MAX_CQ_VALUE).contains(&cq) => Some(cq),
        _ => {
            checks.invalid_cq += 1;
            None
        }
    });

    Channel {
        target: raw.target.clone(),
        result: raw.result.clone(),
        cq,
    }
}

impl ValueChecks {
    fn into_warnings(self, centre: &CompiledCentre) -> Vec<FileError> {
        let mut warnings = Vec::new();
        if let (Some(regex), true) = (&centre.barcode_regex, self.barcode_mismatch > 0) {
            warnings.push(FileError::BarcodeMismatch {
                count: self.barcode_mismatch,
                regex: regex.as_str().to_string(),
                field: centre.config.barcode_field.clone(),
            });
        }
        if self.disallowed_result > 0 {
            warnings.push(FileError::DisallowedResult { count: self.disallowed_result });
        }
        if self.disallowed_target > 0 {
            warnings.push(FileError::DisallowedChannelTarget { count: self.disallowed_target });
        }
        if self.disallowed_channel_result > 0 {
            warnings.push(FileError::DisallowedChannelResult { count: self.disallowed_channel_result });
        }
        if self.invalid_cq > 0 {
            warnings.push(FileError::InvalidCq { count: self.invalid_cq });
        }
        warnings
    }
}

/// Parse a `Date Tested` value in any of the formats centres send.
pub fn parse_date_tested(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DATE_TESTED_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CentreConfig, DEFAULT_BARCODE_REGEX};
    use chrono::{Datelike, Timelike};

    fn centre(barcode_regex: Option<&str>) -> CompiledCentre {
        CentreConfig {
            name: "Alderley".to_string(),
            prefix: "ALDP".to_string(),
            lab_id_default: "AP".to_string(),
            barcode_field: FIELD_RNA_ID.to_string(),
            barcode_regex: barcode_regex.map(str::to_string),
            backups_folder: "backups".into(),
            file_regex: ".*".to_string(),
            file_names_to_ignore: Vec::new(),
            biomek_labware_class: "KingFisher_96_2ml".to_string(),
        }
        .compile()
        .unwrap()
    }

    const HEADER: &str = "Root Sample ID,Viral Prep ID,RNA ID,RNA-PCR ID,Result,Date Tested,Lab ID,CH1-Target,CH1-Result,CH1-Cq\n";

    #[test]
    fn test_missing_headers_are_all_named() {
        let err = parse("Root Sample ID,Result\nR1,Positive\n".as_bytes()).unwrap_err();
        assert_eq!(
            err,
            FileError::MissingRequiredFields(vec![FIELD_RNA_ID.to_string(), FIELD_DATE_TESTED.to_string()])
        );
        assert_eq!(err.to_string(), "RNA ID, Date Tested missing in CSV file");
    }

    #[test]
    fn test_empty_file_has_no_headers() {
        assert_eq!(parse("".as_bytes()).unwrap_err(), FileError::NoHeaders);
    }

    #[test]
    fn test_parse_splits_known_and_extra_columns() {
        let content = format!(
            "{HEADER}MCM001,VP1,DN123_A01,PCR1,Positive,2020-04-23 14:40:00 UTC,AP,ORF1ab,Positive,24.98\n"
        );
        let parsed = parse(content.as_bytes()).unwrap();
        let row = &parsed.rows[0];

        assert_eq!(row.line_number, 2);
        assert_eq!(row.root_sample_id, "MCM001");
        assert_eq!(row.channels[0].cq.as_deref(), Some("24.98"));
        assert_eq!(row.channels[1], RawChannel::default());
        assert_eq!(row.extra.get("Viral Prep ID").map(String::as_str), Some("VP1"));
        assert_eq!(row.field("RNA-PCR ID"), Some("PCR1"));
    }

    #[test]
    fn test_augment_extracts_barcode_and_coordinate() {
        let content = format!("{HEADER}MCM001,VP1,DN123_A01,PCR1,Positive,2020-04-23 14:40:00 UTC,,,,\n");
        let parsed = parse(content.as_bytes()).unwrap();
        let now = Utc::now();

        let augmented = augment(parsed.rows, &centre(Some(DEFAULT_BARCODE_REGEX)), "AP_1.csv", now);
        let sample = &augmented.samples[0];

        assert_eq!(sample.plate_barcode, "DN123");
        assert_eq!(sample.coordinate, "A01");
        assert_eq!(sample.source, "Alderley");
        assert_eq!(sample.lab_id, "AP");
        assert_eq!(sample.file_name, "AP_1.csv");
        assert_eq!(sample.created_at, now);
        assert!(augmented.warnings.is_empty());
    }

    #[test]
    fn test_barcode_mismatch_is_a_warning_not_a_rejection() {
        let content = format!(
            "{HEADER}R1,,DN123_A01,,Positive,,,,,\nR2,,NOT-A-WELL,,Negative,,,,,\nR3,,,,Negative,,,,,\n"
        );
        let parsed = parse(content.as_bytes()).unwrap();
        let augmented = augment(parsed.rows, &centre(Some(DEFAULT_BARCODE_REGEX)), "AP_1.csv", Utc::now());

        assert_eq!(augmented.samples.len(), 3);
        assert_eq!(augmented.samples[1].plate_barcode, "");
        assert_eq!(
            augmented.warnings,
            vec![FileError::BarcodeMismatch {
                count: 2,
                regex: DEFAULT_BARCODE_REGEX.to_string(),
                field: FIELD_RNA_ID.to_string(),
            }]
        );
    }

    #[test]
    fn test_missing_barcode_column_is_tolerated() {
        let mut compiled = centre(Some(DEFAULT_BARCODE_REGEX));
        compiled.config.barcode_field = "Plate Barcode".to_string();

        let content = format!("{HEADER}R1,,DN123_A01,,Positive,,,,,\n");
        let parsed = parse(content.as_bytes()).unwrap();
        let augmented = augment(parsed.rows, &compiled, "AP_1.csv", Utc::now());

        assert_eq!(augmented.samples[0].plate_barcode, "");
        assert!(augmented.warnings.is_empty());
    }

    #[test]
    fn test_without_regex_barcode_is_taken_verbatim() {
        let content = format!("{HEADER}R1,,DN123_A01,,Positive,,,,,\n");
        let parsed = parse(content.as_bytes()).unwrap();
        let augmented = augment(parsed.rows, &centre(None), "AP_1.csv", Utc::now());

        assert_eq!(augmented.samples[0].plate_barcode, "DN123_A01");
        assert_eq!(augmented.samples[0].coordinate, "");
    }

    #[test]
    fn test_value_checks_warn_and_drop_bad_cq() {
        let content = format!(
            "{HEADER}R1,,DN1_A01,,Maybe,,,Spike,Unsure,101.5\nR2,,DN1_A02,,Positive,,,N gene,Positive,abc\n"
        );
        let parsed = parse(content.as_bytes()).unwrap();
        let augmented = augment(parsed.rows, &centre(Some(DEFAULT_BARCODE_REGEX)), "AP_1.csv", Utc::now());

        assert!(augmented.samples.iter().all(|s| s.channels[0].cq.is_none()));
        assert_eq!(augmented.samples[0].channels[0].target.as_deref(), Some("Spike"));
        assert!(augmented.warnings.contains(&FileError::DisallowedResult { count: 1 }));
        assert!(augmented.warnings.contains(&FileError::DisallowedChannelTarget { count: 1 }));
        assert!(augmented.warnings.contains(&FileError::DisallowedChannelResult { count: 1 }));
        assert!(augmented.warnings.contains(&FileError::InvalidCq { count: 2 }));
    }

    #[test]
    fn test_parse_date_tested_formats() {
        let utc = parse_date_tested("2020-04-23 14:40:00 UTC").unwrap();
        assert_eq!((utc.day(), utc.hour(), utc.minute()), (23, 14, 40));
        assert!(parse_date_tested("2020-04-23 14:40:00").is_some());
        assert!(parse_date_tested("23/04/2020 14:40").is_some());
        assert!(parse_date_tested("yesterday").is_none());
    }
}
