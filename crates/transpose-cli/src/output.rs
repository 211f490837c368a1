//! Rendering of benchmark reports and device lists.

use anyhow::{Context, Result};
use console::style;
use std::fmt::Write as _;
use transpose_vulkan::{BenchmarkReport, DeviceInfo};

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text (default).
    #[default]
    Text,
    /// Machine-readable JSON.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown format '{other}'. Expected one of: text, json")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Render the benchmark report. `color` forces styling on or off.
pub fn render_report(report: &BenchmarkReport, format: OutputFormat, color: bool) -> Result<String> {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(report).context("Failed to serialize report");
    }
    let label = |s: &str| style(s.to_string()).bold().force_styling(color);
    let value = |s: String| style(s).cyan().force_styling(color);

    let rows = [
        ("Transpose time with no bank conflicts", format!("{:.3} ms", report.no_bank_conflicts_ms)),
        ("Transpose time with bank conflicts", format!("{:.3} ms", report.bank_conflicts_ms)),
        ("Transfer time", format!("{:.3} ms", report.transfer_ms)),
        ("Coalesced Memory", format!("{} bytes", report.coalesced_bytes)),
        ("System size", format!("{}x{}", report.size, report.size)),
        ("Buffer size", format!("{} KB", report.buffer_kib)),
        ("Bandwidth", format!("{:.1} GB/s", report.bandwidth_gib_s)),
        (
            "Transfer time/total transpose time",
            format!("{:.3}%", report.transfer_ratio_percent),
        ),
    ];

    let mut out = String::new();
    writeln!(out, "{}", style(&report.device).green().bold().force_styling(color))?;
    for (name, text) in rows {
        writeln!(out, "{}: {}", label(name), value(text))?;
    }
    if report.verified {
        writeln!(out, "{}", style("Output verified").green().force_styling(color))?;
    }
    Ok(out)
}

/// Render the physical device list.
pub fn render_devices(devices: &[DeviceInfo], format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(devices).context("Failed to serialize device list");
    }
    let mut out = String::new();
    for device in devices {
        writeln!(out, "{device}")?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use transpose_vulkan::Vendor;

    fn report() -> BenchmarkReport {
        BenchmarkReport {
            device: "Test GPU".into(),
            size: 2048,
            coalesced_bytes: 32,
            buffer_kib: 16384,
            repetitions: 1000,
            no_bank_conflicts_ms: 0.5,
            bank_conflicts_ms: 0.75,
            transfer_ms: 0.25,
            bandwidth_gib_s: 125.0,
            transfer_ratio_percent: 50.0,
            verified: false,
            variants: Vec::new(),
        }
    }

    #[test]
    fn format_parsing() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("TEXT".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("xml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Json.to_string(), "json");
    }

    #[test]
    fn plain_text_report() {
        let text = render_report(&report(), OutputFormat::Text, false).unwrap();
        let expected = "\
Test GPU
Transpose time with no bank conflicts: 0.500 ms
Transpose time with bank conflicts: 0.750 ms
Transfer time: 0.250 ms
Coalesced Memory: 32 bytes
System size: 2048x2048
Buffer size: 16384 KB
Bandwidth: 125.0 GB/s
Transfer time/total transpose time: 50.000%
";
        assert_eq!(text, expected);
    }

    #[test]
    fn json_report_fields() {
        let json = render_report(&report(), OutputFormat::Json, false).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["size"], 2048);
        assert_eq!(v["coalesced_bytes"], 32);
        assert_eq!(v["transfer_ratio_percent"], 50.0);
    }

    #[test]
    fn device_list_text_and_json() {
        let devices = vec![DeviceInfo {
            index: 0,
            name: "Test GPU".into(),
            vendor: Vendor::Amd,
            device_type: "discrete".into(),
            api_version: "1.3.250".into(),
        }];
        assert_eq!(
            render_devices(&devices, OutputFormat::Text).unwrap(),
            "Device id: 0 name: Test GPU API:1.3.250\n"
        );
        let json = render_devices(&devices, OutputFormat::Json).unwrap();
        assert!(json.contains("\"vendor\": \"Amd\""));
    }
}
