use std::time::Duration;
use time::PrimitiveDateTime;

use crate::utils::format_hour_minute;

/// One record from the detector's data buffer.
///
/// The buffer mixes several record types (`RealTimeData`, `RareData`, ...);
/// each reading is `Some` only when the record type carries it.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedSample {
    pub kind: String,
    pub timestamp: PrimitiveDateTime,
    pub dose_rate: Option<f64>,
    pub count_rate: Option<f64>,
    pub dose_rate_err: Option<f64>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub duration: Duration,
    pub a0: f64,
    pub a1: f64,
    pub a2: f64,
    pub counts: Vec<u32>,
}

/// Readings assembled by one `fetch_snapshot` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RadiationSnapshot {
    dose_rate_usv_h: f64,
    counts_per_second: f64,
    dose_rate_error_percent: f64,
    timestamp: PrimitiveDateTime,
    serial_number: String,
    spectrum_counts: Vec<u32>,
    temperature_celsius: f64,
}

impl RadiationSnapshot {
    pub(crate) fn new(
        dose_rate_usv_h: f64,
        counts_per_second: f64,
        dose_rate_error_percent: f64,
        timestamp: PrimitiveDateTime,
        serial_number: String,
        spectrum_counts: Vec<u32>,
        temperature_celsius: f64,
    ) -> Self {
        Self {
            dose_rate_usv_h,
            counts_per_second,
            dose_rate_error_percent,
            timestamp,
            serial_number,
            spectrum_counts,
            temperature_celsius,
        }
    }

    pub fn dose_rate_usv_h(&self) -> f64 {
        self.dose_rate_usv_h
    }

    pub fn counts_per_second(&self) -> f64 {
        self.counts_per_second
    }

    pub fn dose_rate_error_percent(&self) -> f64 {
        self.dose_rate_error_percent
    }

    /// Device wall-clock time of the most recent buffered sample.
    pub fn timestamp(&self) -> PrimitiveDateTime {
        self.timestamp
    }

    /// The sample time as `HH:MM`.
    pub fn formatted_time(&self) -> String {
        format_hour_minute(&self.timestamp)
    }

    /// Empty when the device configuration has no `SerialNumber=` line.
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn spectrum_counts(&self) -> &[u32] {
        &self.spectrum_counts
    }

    /// Raw temperature value, `NaN` when no buffered sample reported one.
    pub fn temperature_celsius(&self) -> f64 {
        self.temperature_celsius
    }

    pub fn temperature(&self) -> Option<f64> {
        if self.temperature_celsius.is_nan() {
            None
        } else {
            Some(self.temperature_celsius)
        }
    }
}
