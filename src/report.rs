/// Console report for one snapshot
use std::fmt::Write;

use crate::models::RadiationSnapshot;
use crate::utils::format_full_time;

const SPECTRUM_PREVIEW_CHANNELS: usize = 10;

/// Render `snapshot` as a human-readable report
///
/// `full_time` prints the complete sample timestamp instead of `HH:MM`.
pub fn render_report(snapshot: &RadiationSnapshot, full_time: bool) -> String {
    let mut out = String::new();

    let time = if full_time {
        format_full_time(&snapshot.timestamp())
    } else {
        snapshot.formatted_time()
    };
    let serial = if snapshot.serial_number().is_empty() {
        "unknown"
    } else {
        snapshot.serial_number()
    };
    let temperature = match snapshot.temperature() {
        Some(t) => format!("{:.1}°C", t),
        None => "unknown".to_string(),
    };
    let preview = snapshot
        .spectrum_counts()
        .iter()
        .take(SPECTRUM_PREVIEW_CHANNELS)
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(" ");

    // Writing to a String cannot fail
    let _ = writeln!(out, "Dose rate: {:.6} µSv/h", snapshot.dose_rate_usv_h());
    let _ = writeln!(out, "CPS: {:.2}", snapshot.counts_per_second());
    let _ = writeln!(out, "Error: {}%", snapshot.dose_rate_error_percent());
    let _ = writeln!(out, "Time: {}", time);
    let _ = writeln!(out, "S/N: {}", serial);
    let _ = writeln!(out, "Temperature: {}", temperature);
    let _ = writeln!(
        out,
        "Spectrum (first {} of {} channels): {}",
        snapshot.spectrum_counts().len().min(SPECTRUM_PREVIEW_CHANNELS),
        snapshot.spectrum_counts().len(),
        preview
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn snapshot(temperature: f64, counts: Vec<u32>) -> RadiationSnapshot {
        RadiationSnapshot::new(
            0.12,
            5.25,
            14.0,
            datetime!(2024-05-02 08:07:30),
            "RC-102-000123".to_string(),
            counts,
            temperature,
        )
    }

    #[test]
    fn test_report_lines() {
        let report = render_report(&snapshot(22.5, (0..20).collect()), false);
        assert!(report.contains("Dose rate: 0.120000 µSv/h"));
        assert!(report.contains("CPS: 5.25"));
        assert!(report.contains("Error: 14%"));
        assert!(report.contains("Time: 08:07\n"));
        assert!(report.contains("S/N: RC-102-000123"));
        assert!(report.contains("Temperature: 22.5°C"));
        assert!(report.contains("Spectrum (first 10 of 20 channels): 0 1 2 3 4 5 6 7 8 9\n"));
    }

    #[test]
    fn test_report_unknown_temperature_and_short_spectrum() {
        let report = render_report(&snapshot(f64::NAN, vec![4, 2]), true);
        assert!(report.contains("Temperature: unknown"));
        assert!(report.contains("Time: 2024-05-02 08:07:30"));
        assert!(report.contains("Spectrum (first 2 of 2 channels): 4 2\n"));
    }
}
