//! Descriptive statistics fed to the summarizer prompt.

use crate::models::VitalsReading;
use serde::{Deserialize, Serialize};

/// Averages and extremes over a set of readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalStatistics {
    pub avg_heart_rate: f64,
    pub avg_spo2: f64,
    pub avg_temp: f64,
    pub avg_systolic: f64,
    pub avg_diastolic: f64,
    pub avg_steps: f64,
    pub max_heart_rate: i64,
    pub min_heart_rate: i64,
    pub max_temp: f64,
    pub min_spo2: i64,
}

/// Compute statistics; `None` for an empty input.
pub fn compute(readings: &[VitalsReading]) -> Option<VitalStatistics> {
    if readings.is_empty() {
        return None;
    }

    let mean = |f: fn(&VitalsReading) -> f64| {
        readings.iter().map(f).sum::<f64>() / readings.len() as f64
    };

    Some(VitalStatistics {
        avg_heart_rate: round1(mean(|r| r.heart_rate as f64)),
        avg_spo2: round1(mean(|r| r.spo2 as f64)),
        avg_temp: round1(mean(|r| r.temp_c)),
        avg_systolic: round1(mean(|r| r.systolic_bp as f64)),
        avg_diastolic: round1(mean(|r| r.diastolic_bp as f64)),
        avg_steps: mean(|r| r.steps as f64).round_ties_even(),
        max_heart_rate: readings.iter().map(|r| r.heart_rate).max().unwrap_or_default(),
        min_heart_rate: readings.iter().map(|r| r.heart_rate).min().unwrap_or_default(),
        max_temp: readings
            .iter()
            .map(|r| r.temp_c)
            .fold(f64::NEG_INFINITY, f64::max),
        min_spo2: readings.iter().map(|r| r.spo2).min().unwrap_or_default(),
    })
}

/// One decimal place, halves to even.
fn round1(value: f64) -> f64 {
    (value * 10.0).round_ties_even() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::detector::reading;

    #[test]
    fn test_empty_input() {
        assert!(compute(&[]).is_none());
    }

    #[test]
    fn test_statistics() {
        let readings = vec![
            reading(70, 97, 36.5, 120, 80),
            reading(80, 95, 37.0, 130, 85),
            reading(91, 99, 36.8, 110, 70),
        ];
        let stats = compute(&readings).unwrap();

        assert_eq!(stats.avg_heart_rate, 80.3);
        assert_eq!(stats.avg_spo2, 97.0);
        assert_eq!(stats.avg_temp, 36.8);
        assert_eq!(stats.avg_systolic, 120.0);
        assert_eq!(stats.avg_diastolic, 78.3);
        assert_eq!(stats.avg_steps, 1000.0);
        assert_eq!(stats.max_heart_rate, 91);
        assert_eq!(stats.min_heart_rate, 70);
        assert_eq!(stats.max_temp, 37.0);
        assert_eq!(stats.min_spo2, 95);
    }

    #[test]
    fn test_halves_round_to_even() {
        let mut readings = vec![
            reading(80, 97, 36.5, 120, 80),
            reading(80, 97, 36.5, 120, 80),
            reading(80, 97, 36.5, 120, 80),
            reading(81, 97, 36.5, 120, 80),
        ];
        readings[0].steps = 1001;
        readings[1].steps = 1001;
        let stats = compute(&readings).unwrap();

        assert_eq!(stats.avg_heart_rate, 80.2);
        assert_eq!(stats.avg_steps, 1000.0);
    }
}
