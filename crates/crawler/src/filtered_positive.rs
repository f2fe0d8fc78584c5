//! Versioned filtered-positive rules.
//!
//! A version tag is written next to every decision. Old versions are frozen;
//! they only exist so the legacy backfill can reproduce historical decisions.

use chrono::{DateTime, Utc};
use crawler_db::{FilteredPositive, Sample};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use rust_decimal::Decimal;

pub const FILTERED_POSITIVE_VERSION_0: &str = "v0";
pub const FILTERED_POSITIVE_VERSION_1: &str = "v1";
pub const FILTERED_POSITIVE_VERSION_2: &str = "v2";

static POSITIVE_RESULT: Lazy<Regex> = Lazy::new(|| Regex::new("^Positive").expect("positive result regex"));

static POSITIVE_OR_LIMIT_OF_DETECTION_RESULT: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new("^(?:Positive|limit of detection)")
        .case_insensitive(true)
        .build()
        .expect("positive or limit of detection regex")
});

static CONTROL_ROOT_SAMPLE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new("^(?:CBIQA_|QC0|ZZA000)").expect("control root sample id regex"));

/// CT values at or under this are positive.
const CT_VALUE_LIMIT: Decimal = Decimal::from_parts(30, 0, 0, false, 0);

/// One frozen rule set.
pub trait FilteredPositiveIdentifier: Send + Sync {
    fn version(&self) -> &'static str;

    fn is_positive(&self, sample: &Sample) -> bool;

    /// Classify and stamp the result with this version and `timestamp`.
    fn classify(&self, sample: &Sample, timestamp: DateTime<Utc>) -> FilteredPositive {
        FilteredPositive {
            positive: self.is_positive(sample),
            version: self.version().to_string(),
            timestamp,
        }
    }
}

/// Positive result only.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilteredPositiveIdentifierV0;

/// Positive result, not a control, CT at or under the limit.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilteredPositiveIdentifierV1;

/// As v1, but case-insensitive and limit-of-detection results count.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilteredPositiveIdentifierV2;

impl FilteredPositiveIdentifier for FilteredPositiveIdentifierV0 {
    fn version(&self) -> &'static str {
        FILTERED_POSITIVE_VERSION_0
    }

    fn is_positive(&self, sample: &Sample) -> bool {
        POSITIVE_RESULT.is_match(&sample.result)
    }
}

impl FilteredPositiveIdentifier for FilteredPositiveIdentifierV1 {
    fn version(&self) -> &'static str {
        FILTERED_POSITIVE_VERSION_1
    }

    fn is_positive(&self, sample: &Sample) -> bool {
        POSITIVE_RESULT.is_match(&sample.result) && passes_control_and_ct(sample)
    }
}

impl FilteredPositiveIdentifier for FilteredPositiveIdentifierV2 {
    fn version(&self) -> &'static str {
        FILTERED_POSITIVE_VERSION_2
    }

    fn is_positive(&self, sample: &Sample) -> bool {
        POSITIVE_OR_LIMIT_OF_DETECTION_RESULT.is_match(&sample.result) && passes_control_and_ct(sample)
    }
}

fn passes_control_and_ct(sample: &Sample) -> bool {
    if CONTROL_ROOT_SAMPLE_ID.is_match(&sample.root_sample_id) {
        return false;
    }

    let cqs: Vec<Decimal> = sample.channels[..3].iter().filter_map(|channel| channel.cq).collect();
    if cqs.is_empty() {
        return true;
    }
    cqs.iter().any(|cq| *cq <= CT_VALUE_LIMIT)
}

static IDENTIFIERS: [&(dyn FilteredPositiveIdentifier); 3] = [
    &FilteredPositiveIdentifierV0,
    &FilteredPositiveIdentifierV1,
    &FilteredPositiveIdentifierV2,
];

/// Look up the identifier for a version tag.
pub fn identifier_for(version: &str) -> Option<&'static dyn FilteredPositiveIdentifier> {
    IDENTIFIERS.iter().copied().find(|identifier| identifier.version() == version)
}

/// The rule set new samples are classified with.
pub fn current_identifier() -> &'static dyn FilteredPositiveIdentifier {
    &FilteredPositiveIdentifierV2
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample(root: &str, result: &str, cqs: [Option<&str>; 3]) -> Sample {
        let mut sample = Sample::new(root, "DN123_A01", result);
        for (channel, cq) in sample.channels.iter_mut().zip(cqs) {
            channel.cq = cq.map(|v| Decimal::from_str(v).unwrap());
        }
        sample
    }

    const LOW: [Option<&str>; 3] = [Some("5.12"), Some("6.12"), Some("7.12")];
    const HIGH: [Option<&str>; 3] = [Some("40.1"), Some("41.1"), Some("42.1")];
    const NONE: [Option<&str>; 3] = [None, None, None];

    #[test]
    fn test_v2_positive_with_low_ct() {
        assert!(FilteredPositiveIdentifierV2.is_positive(&sample("MCM001", "Positive", LOW)));
    }

    #[test]
    fn test_v2_result_is_case_insensitive() {
        assert!(FilteredPositiveIdentifierV2.is_positive(&sample("MCM001", "POSITIVE", LOW)));
        assert!(FilteredPositiveIdentifierV2.is_positive(&sample("MCM001", "Limit of Detection", NONE)));
    }

    #[test]
    fn test_v2_no_ct_values_is_positive() {
        assert!(FilteredPositiveIdentifierV2.is_positive(&sample("MCM001", "Positive", NONE)));
    }

    #[test]
    fn test_v2_all_ct_values_above_limit() {
        assert!(!FilteredPositiveIdentifierV2.is_positive(&sample("MCM001", "Positive", HIGH)));
    }

    #[test]
    fn test_v2_one_ct_at_limit_is_enough() {
        let cqs = [Some("40.1"), None, Some("30.0")];
        assert!(FilteredPositiveIdentifierV2.is_positive(&sample("MCM001", "Positive", cqs)));
    }

    #[test]
    fn test_v2_control_samples_are_excluded() {
        for root in ["CBIQA_MCM001", "QC0MCM001", "ZZA000MCM001"] {
            assert!(!FilteredPositiveIdentifierV2.is_positive(&sample(root, "Positive", LOW)));
        }
    }

    #[test]
    fn test_v2_leading_whitespace_fails_anchor() {
        assert!(!FilteredPositiveIdentifierV2.is_positive(&sample("MCM001", "  positive", LOW)));
        assert!(!FilteredPositiveIdentifierV2.is_positive(&sample("MCM001", "Negative", LOW)));
    }

    #[test]
    fn test_ch4_is_ignored() {
        let mut s = sample("MCM001", "Positive", HIGH);
        s.channels[3].cq = Some(Decimal::from_str("1.0").unwrap());
        assert!(!FilteredPositiveIdentifierV2.is_positive(&s));
    }

    #[test]
    fn test_v1_is_case_sensitive_and_ignores_limit_of_detection() {
        assert!(FilteredPositiveIdentifierV1.is_positive(&sample("MCM001", "Positive", LOW)));
        assert!(!FilteredPositiveIdentifierV1.is_positive(&sample("MCM001", "POSITIVE", LOW)));
        assert!(!FilteredPositiveIdentifierV1.is_positive(&sample("MCM001", "limit of detection", NONE)));
        assert!(!FilteredPositiveIdentifierV1.is_positive(&sample("CBIQA_1", "Positive", LOW)));
    }

    #[test]
    fn test_v0_only_checks_result() {
        assert!(FilteredPositiveIdentifierV0.is_positive(&sample("CBIQA_1", "Positive", HIGH)));
        assert!(!FilteredPositiveIdentifierV0.is_positive(&sample("MCM001", "Negative", LOW)));
    }

    #[test]
    fn test_lookup_by_version() {
        assert_eq!(identifier_for("v0").map(|i| i.version()), Some("v0"));
        assert_eq!(identifier_for("v1").map(|i| i.version()), Some("v1"));
        assert_eq!(identifier_for("v2").map(|i| i.version()), Some("v2"));
        assert!(identifier_for("v3").is_none());
        assert_eq!(current_identifier().version(), FILTERED_POSITIVE_VERSION_2);
    }

    #[test]
    fn test_classify_stamps_version_and_timestamp() {
        let now = Utc::now();
        let fp = current_identifier().classify(&sample("MCM001", "Positive", NONE), now);
        assert!(fp.positive);
        assert_eq!(fp.version, "v2");
        assert_eq!(fp.timestamp, now);
    }
}
