/// Utility functions for unit conversion, parsing and formatting
use time::macros::format_description;
use time::PrimitiveDateTime;

use crate::models::BufferedSample;

/// Device-native dose rate units per µSv/h.
pub const DOSE_RATE_SCALE: f64 = 10_000.0;

const SERIAL_NUMBER_KEY: &str = "SerialNumber=";

/// Format a sample timestamp as `HH:MM` (24-hour, zero-padded)
///
/// Falls back to default string representation if formatting fails.
pub fn format_hour_minute(dt: &PrimitiveDateTime) -> String {
    dt.format(format_description!("[hour]:[minute]"))
        .unwrap_or_else(|_| dt.to_string())
}

/// Format a sample timestamp as `YYYY-MM-DD HH:MM:SS`
pub fn format_full_time(dt: &PrimitiveDateTime) -> String {
    dt.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| dt.to_string())
}

/// Parse the `YYYY-MM-DDTHH:MM:SS` wall-clock time the bridge helper emits
pub fn parse_device_time(s: &str) -> Result<PrimitiveDateTime, time::error::Parse> {
    PrimitiveDateTime::parse(
        s,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    )
}

/// Convert a device-native dose rate to µSv/h
pub fn native_to_usv_h(native: f64) -> f64 {
    native * DOSE_RATE_SCALE
}

/// Extract the serial number from the device configuration text
///
/// The configuration is a list of `key=value` lines in no fixed order.
/// Returns an empty string when no line starts with `SerialNumber=`.
pub fn parse_serial_number(configuration: &str) -> String {
    configuration
        .split('\n')
        .find_map(|line| line.strip_prefix(SERIAL_NUMBER_KEY))
        .map(|value| value.trim_end_matches('\r').to_string())
        .unwrap_or_default()
}

/// Temperature of the most recent sample that reports one
pub fn latest_temperature(samples: &[BufferedSample]) -> Option<f64> {
    samples.iter().rev().find_map(|sample| sample.temperature)
}
