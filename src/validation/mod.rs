//! Row validation against the telemetry schema.
//!
//! Checks run in a fixed order and the first failure wins:
//! presence of every schema field, then parse and range per numeric field
//! in schema order, then the blood-pressure cross check.

pub mod csv_rows;

use crate::models::{Field, RawRecord, ReasonCode, ValidationOutcome, VitalsReading};
use serde::{Deserialize, Serialize};

pub use csv_rows::{read_csv, write_csv, CsvTable};

/// Column appended to rejected rows.
pub const REJECT_REASON_COLUMN: &str = "reject_reason";

/// Inclusive sensor-plausibility bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeTable {
    #[serde(default = "default_heart_rate")]
    pub heart_rate: (i64, i64),

    #[serde(default = "default_spo2")]
    pub spo2: (i64, i64),

    #[serde(default = "default_steps")]
    pub steps: (i64, i64),

    #[serde(default = "default_temp_c")]
    pub temp_c: (f64, f64),

    #[serde(default = "default_systolic_bp")]
    pub systolic_bp: (i64, i64),

    #[serde(default = "default_diastolic_bp")]
    pub diastolic_bp: (i64, i64),
}

impl Default for RangeTable {
    fn default() -> Self {
        Self {
            heart_rate: default_heart_rate(),
            spo2: default_spo2(),
            steps: default_steps(),
            temp_c: default_temp_c(),
            systolic_bp: default_systolic_bp(),
            diastolic_bp: default_diastolic_bp(),
        }
    }
}

fn default_heart_rate() -> (i64, i64) {
    (50, 180)
}

fn default_spo2() -> (i64, i64) {
    (90, 100)
}

fn default_steps() -> (i64, i64) {
    (0, 50_000)
}

fn default_temp_c() -> (f64, f64) {
    (35.0, 40.0)
}

fn default_systolic_bp() -> (i64, i64) {
    (90, 180)
}

fn default_diastolic_bp() -> (i64, i64) {
    (60, 120)
}

/// Rows split by validation outcome, each group in input order.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub valid: Vec<(RawRecord, VitalsReading)>,
    pub rejected: Vec<(RawRecord, ReasonCode)>,
}

impl Partition {
    pub fn total(&self) -> usize {
        self.valid.len() + self.rejected.len()
    }

    /// Rejected rows with their reason appended, for the audit output.
    pub fn rejected_audit_rows(&self) -> Vec<RawRecord> {
        self.rejected
            .iter()
            .map(|(row, reason)| {
                let mut audit = row.clone();
                audit.insert(REJECT_REASON_COLUMN, reason.to_string());
                audit
            })
            .collect()
    }
}

/// Stateless row classifier.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    ranges: RangeTable,
}

impl Validator {
    pub fn new(ranges: RangeTable) -> Self {
        Self { ranges }
    }

    /// Classify a single row. Never panics on malformed input.
    pub fn validate(&self, row: &RawRecord) -> ValidationOutcome {
        match self.parse_reading(row) {
            Ok(_) => ValidationOutcome::accepted(),
            Err(reason) => ValidationOutcome::rejected(reason),
        }
    }

    /// Validate and convert a row into a typed reading.
    pub fn parse_reading(&self, row: &RawRecord) -> Result<VitalsReading, ReasonCode> {
        typed_reading(row, Some(&self.ranges))
    }

    /// Split rows into accepted and rejected sets.
    pub fn partition(&self, rows: Vec<RawRecord>) -> Partition {
        let mut partition = Partition::default();
        for row in rows {
            match self.parse_reading(&row) {
                Ok(reading) => partition.valid.push((row, reading)),
                Err(reason) => partition.rejected.push((row, reason)),
            }
        }
        partition
    }
}

/// Parse a row that already passed validation, without range checks.
///
/// Used when reloading processed output; the blood-pressure cross check
/// is skipped as well.
pub fn read_reading(row: &RawRecord) -> Result<VitalsReading, ReasonCode> {
    typed_reading(row, None)
}

fn typed_reading(row: &RawRecord, ranges: Option<&RangeTable>) -> Result<VitalsReading, ReasonCode> {
    for field in Field::ALL {
        if row.get(field.name()).map_or(true, str::is_empty) {
            return Err(ReasonCode::Missing(field));
        }
    }

    let heart_rate = int_field(row, Field::HeartRate, ranges.map(|r| r.heart_rate))?;
    let spo2 = int_field(row, Field::Spo2, ranges.map(|r| r.spo2))?;
    let steps = int_field(row, Field::Steps, ranges.map(|r| r.steps))?;
    let temp_c = float_field(row, Field::TempC, ranges.map(|r| r.temp_c))?;
    let systolic_bp = int_field(row, Field::SystolicBp, ranges.map(|r| r.systolic_bp))?;
    let diastolic_bp = int_field(row, Field::DiastolicBp, ranges.map(|r| r.diastolic_bp))?;

    if ranges.is_some() && diastolic_bp > systolic_bp {
        return Err(ReasonCode::DbpGtSbp);
    }

    Ok(VitalsReading {
        event_time: row.get(Field::EventTime.name()).unwrap_or_default().to_string(),
        user_id: row.get(Field::UserId.name()).unwrap_or_default().to_string(),
        heart_rate,
        spo2,
        steps,
        temp_c,
        systolic_bp,
        diastolic_bp,
    })
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn int_field(row: &RawRecord, field: Field, range: Option<(i64, i64)>) -> Result<i64, ReasonCode> {
    row.get(field.name())
        .and_then(parse_number)
        .map(|v| v.trunc() as i64)
        .filter(|v| range.map_or(true, |(min, max)| (min..=max).contains(v)))
        .ok_or(ReasonCode::Invalid(field))
}

fn float_field(row: &RawRecord, field: Field, range: Option<(f64, f64)>) -> Result<f64, ReasonCode> {
    row.get(field.name())
        .and_then(parse_number)
        .filter(|v| range.map_or(true, |(min, max)| (min..=max).contains(v)))
        .ok_or(ReasonCode::Invalid(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_row() -> RawRecord {
        RawRecord::from_pairs([
            ("event_time", "2024-01-01T08:00:00Z"),
            ("user_id", "user_001"),
            ("heart_rate", "75"),
            ("spo2", "98"),
            ("steps", "1200"),
            ("temp_c", "36.6"),
            ("systolic_bp", "120"),
            ("diastolic_bp", "80"),
        ])
    }

    fn with(column: &str, value: &str) -> RawRecord {
        let mut row = valid_row();
        row.insert(column, value);
        row
    }

    #[test]
    fn test_valid_row() {
        let outcome = Validator::default().validate(&valid_row());
        assert!(outcome.accepted);
        assert_eq!(outcome.reason, ReasonCode::Ok);
    }

    #[test]
    fn test_first_missing_field_wins() {
        let validator = Validator::default();

        let mut row = valid_row();
        row.remove("spo2");
        row.insert("temp_c", "");
        assert_eq!(
            validator.validate(&row).reason.to_string(),
            "missing_spo2"
        );

        let empty = RawRecord::new();
        assert_eq!(
            validator.validate(&empty).reason.to_string(),
            "missing_event_time"
        );
    }

    #[test]
    fn test_heart_rate_boundaries() {
        let validator = Validator::default();
        assert!(validator.validate(&with("heart_rate", "50")).accepted);
        assert!(validator.validate(&with("heart_rate", "180")).accepted);

        for value in ["49", "181"] {
            let outcome = validator.validate(&with("heart_rate", value));
            assert!(!outcome.accepted);
            assert_eq!(outcome.reason.to_string(), "invalid_heart_rate");
        }
    }

    #[test]
    fn test_parse_failures() {
        let validator = Validator::default();
        assert_eq!(
            validator.validate(&with("heart_rate", "abc")).reason,
            ReasonCode::Invalid(Field::HeartRate)
        );
        assert_eq!(
            validator.validate(&with("temp_c", "NaN")).reason,
            ReasonCode::Invalid(Field::TempC)
        );
        assert_eq!(
            validator.validate(&with("steps", "inf")).reason,
            ReasonCode::Invalid(Field::Steps)
        );
    }

    #[test]
    fn test_integer_fields_truncate() {
        let reading = Validator::default()
            .parse_reading(&with("heart_rate", " 75.9 "))
            .unwrap();
        assert_eq!(reading.heart_rate, 75);

        // 180.5 truncates to 180 which is in range
        assert!(Validator::default().validate(&with("heart_rate", "180.5")).accepted);
    }

    #[test]
    fn test_first_failing_field_in_schema_order() {
        let mut row = with("spo2", "80");
        row.insert("diastolic_bp", "500");
        assert_eq!(
            Validator::default().validate(&row).reason,
            ReasonCode::Invalid(Field::Spo2)
        );
    }

    #[test]
    fn test_dbp_gt_sbp() {
        let mut row = with("systolic_bp", "100");
        row.insert("diastolic_bp", "105");
        let outcome = Validator::default().validate(&row);
        assert!(!outcome.accepted);
        assert_eq!(outcome.reason.to_string(), "dbp_gt_sbp");
    }

    #[test]
    fn test_temperature_bounds_inclusive() {
        let validator = Validator::default();
        assert!(validator.validate(&with("temp_c", "35.0")).accepted);
        assert!(validator.validate(&with("temp_c", "40.0")).accepted);
        assert!(!validator.validate(&with("temp_c", "40.1")).accepted);
    }

    #[test]
    fn test_partition_and_audit_rows() {
        let rows = vec![valid_row(), with("spo2", "70"), valid_row()];
        let partition = Validator::default().partition(rows);

        assert_eq!(partition.total(), 3);
        assert_eq!(partition.valid.len(), 2);
        assert_eq!(partition.rejected.len(), 1);

        let audit = partition.rejected_audit_rows();
        assert_eq!(audit[0].get(REJECT_REASON_COLUMN), Some("invalid_spo2"));
        assert_eq!(audit[0].get("user_id"), Some("user_001"));
    }

    #[test]
    fn test_custom_ranges() {
        let validator = Validator::new(RangeTable {
            heart_rate: (40, 200),
            ..RangeTable::default()
        });
        assert!(validator.validate(&with("heart_rate", "45")).accepted);
    }

    #[test]
    fn test_read_reading_skips_ranges() {
        let reading = read_reading(&with("heart_rate", "230")).unwrap();
        assert_eq!(reading.heart_rate, 230);
        assert_eq!(
            read_reading(&with("spo2", "x")).unwrap_err(),
            ReasonCode::Invalid(Field::Spo2)
        );
    }
}
