//! Clinical anomaly detection over validated readings.

use crate::models::{AnomalyFinding, VitalsReading};
use serde::{Deserialize, Serialize};

pub const ABNORMAL_HEART_RATE: &str = "Abnormal heart rate";
pub const LOW_SPO2: &str = "Low SpO2";
pub const HIGH_TEMPERATURE: &str = "High temperature";
pub const HIGH_BLOOD_PRESSURE: &str = "High blood pressure";

/// Clinical-concern thresholds. All comparisons are strict.
///
/// Independent of the validator's plausibility ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    /// Heart rate below this is flagged.
    #[serde(default = "default_heart_rate_low")]
    pub heart_rate_low: i64,

    /// Heart rate above this is flagged.
    #[serde(default = "default_heart_rate_high")]
    pub heart_rate_high: i64,

    /// SpO2 below this is flagged.
    #[serde(default = "default_spo2_low")]
    pub spo2_low: i64,

    /// Temperature above this (Celsius) is flagged.
    #[serde(default = "default_temp_high")]
    pub temp_c_high: f64,

    #[serde(default = "default_systolic_high")]
    pub systolic_high: i64,

    #[serde(default = "default_diastolic_high")]
    pub diastolic_high: i64,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            heart_rate_low: default_heart_rate_low(),
            heart_rate_high: default_heart_rate_high(),
            spo2_low: default_spo2_low(),
            temp_c_high: default_temp_high(),
            systolic_high: default_systolic_high(),
            diastolic_high: default_diastolic_high(),
        }
    }
}

fn default_heart_rate_low() -> i64 {
    60
}

fn default_heart_rate_high() -> i64 {
    160
}

fn default_spo2_low() -> i64 {
    92
}

fn default_temp_high() -> f64 {
    38.0
}

fn default_systolic_high() -> i64 {
    140
}

fn default_diastolic_high() -> i64 {
    90
}

/// Flags readings that cross clinical thresholds.
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    thresholds: ThresholdTable,
}

impl AnomalyDetector {
    pub fn new(thresholds: ThresholdTable) -> Self {
        Self { thresholds }
    }

    /// Reasons triggered by one reading, in rule order.
    pub fn reasons(&self, reading: &VitalsReading) -> Vec<&'static str> {
        let t = &self.thresholds;
        let mut reasons = Vec::new();

        if reading.heart_rate < t.heart_rate_low || reading.heart_rate > t.heart_rate_high {
            reasons.push(ABNORMAL_HEART_RATE);
        }
        if reading.spo2 < t.spo2_low {
            reasons.push(LOW_SPO2);
        }
        if reading.temp_c > t.temp_c_high {
            reasons.push(HIGH_TEMPERATURE);
        }
        if reading.systolic_bp > t.systolic_high || reading.diastolic_bp > t.diastolic_high {
            reasons.push(HIGH_BLOOD_PRESSURE);
        }

        reasons
    }

    /// One finding per flagged reading, in input order.
    pub fn detect(&self, readings: &[VitalsReading]) -> Vec<AnomalyFinding> {
        readings
            .iter()
            .filter_map(|reading| {
                let reasons = self.reasons(reading);
                if reasons.is_empty() {
                    None
                } else {
                    Some(AnomalyFinding::new(reading, &reasons))
                }
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) fn reading(heart_rate: i64, spo2: i64, temp_c: f64, sys: i64, dia: i64) -> VitalsReading {
    VitalsReading {
        event_time: "2024-01-01T00:00:00Z".to_string(),
        user_id: "u1".to_string(),
        heart_rate,
        spo2,
        steps: 1000,
        temp_c,
        systolic_bp: sys,
        diastolic_bp: dia,
    }
}
