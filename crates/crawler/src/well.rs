//! Plate states and well-level properties for plate tracking.

use crawler_db::{PrioritisedSample, PLATE_STATE_NO_PLATE, PLATE_STATE_NO_PROP};
use once_cell::sync::Lazy;
use regex::Regex;

pub const PLATE_STATE_PROPERTY: &str = "state";
pub const PLATE_STATE_PENDING: &str = "pending";
pub const WELL_STATE_PICKABLE: &str = "pickable";
pub const WELLS_PER_PLATE: i64 = 96;

const COLUMNS_PER_ROW: i64 = 12;
const LAST_ROW: char = 'H';

static COORDINATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Z])(\d{1,2})$").expect("coordinate regex"));

/// Plate state as reported by plate tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlateState {
    Pending,
    NoPlate,
    NoProp,
    Pickable,
    Other(String),
}

impl PlateState {
    pub fn parse(value: &str) -> Self {
        match value {
            PLATE_STATE_PENDING => Self::Pending,
            PLATE_STATE_NO_PLATE => Self::NoPlate,
            PLATE_STATE_NO_PROP => Self::NoProp,
            WELL_STATE_PICKABLE => Self::Pickable,
            other => Self::Other(other.to_string()),
        }
    }

    /// Well properties may only be written on pending plates.
    pub fn accepts_wells(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// `A01` -> 1, `A12` -> 12, `B01` -> 13 .. `H12` -> 96.
pub fn well_index(coordinate: &str) -> Option<i64> {
    let caps = COORDINATE.captures(coordinate)?;
    let row = caps[1].chars().next()?;
    let column: i64 = caps[2].parse().ok()?;

    if row > LAST_ROW || !(1..=COLUMNS_PER_ROW).contains(&column) {
        return None;
    }
    let row_index = i64::from(row as u8 - b'A');
    Some(row_index * COLUMNS_PER_ROW + column)
}

/// Name/value pairs written for one well.
pub fn well_properties(record: &PrioritisedSample) -> Vec<(&'static str, String)> {
    let sample = &record.sample;
    let positive = sample.filtered_positive.as_ref().is_some_and(|fp| fp.positive);
    let pickable = positive || record.priority.must_sequence || record.priority.preferentially_sequence;

    vec![
        (
            PLATE_STATE_PROPERTY,
            if pickable { WELL_STATE_PICKABLE.to_string() } else { String::new() },
        ),
        ("root_sample_id", sample.root_sample_id.clone()),
        ("rna_id", sample.rna_id.clone()),
        ("lab_id", sample.lab_id.clone()),
    ]
}
