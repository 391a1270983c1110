//! Snapshot pushed to subscribers and its event framing.
//! The displays parse this text directly, so field order and precision are fixed.

use std::fmt;

/// Shown when no CPU temperature source answers.
pub const FALLBACK_CPU_TEMPERATURE: &str = "0°C";

/// One complete set of host metrics captured at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub cpu_usage_percent: f64,
    pub cpu_temperature: String,
    pub cpu_frequency_mhz: f64,
    pub cpu_power_watts: f64,
    pub gpu_usage_percent: f64,
    pub gpu_temperature_c: f64,
    pub gpu_power_watts: f64,
    pub ram_usage_percent: f64,
    pub ram_used_mb: f64,
    pub net_upload_kbps: f64,
    pub net_download_kbps: f64,
}

impl Default for MetricSnapshot {
    fn default() -> Self {
        Self {
            cpu_usage_percent: 0.0,
            cpu_temperature: FALLBACK_CPU_TEMPERATURE.to_string(),
            cpu_frequency_mhz: 0.0,
            cpu_power_watts: 0.0,
            gpu_usage_percent: 0.0,
            gpu_temperature_c: 0.0,
            gpu_power_watts: 0.0,
            ram_usage_percent: 0.0,
            ram_used_mb: 0.0,
            net_upload_kbps: 0.0,
            net_download_kbps: 0.0,
        }
    }
}

impl MetricSnapshot {
    /// Frames the snapshot as a single server-sent event: the first line carries the
    /// `data: ` prefix and a blank line terminates the event.
    pub fn to_event(&self) -> String {
        format!("data: {self}\n\n")
    }
}

/// The eleven metric lines, without event framing.
impl fmt::Display for MetricSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CPU usage {:.1}%", self.cpu_usage_percent)?;
        writeln!(f, "CPU temp {}", self.cpu_temperature)?;
        writeln!(f, "CPU freq {:.1}MHz", self.cpu_frequency_mhz)?;
        writeln!(f, "CPU power {:.1}W", self.cpu_power_watts)?;
        writeln!(f, "GPU usage {:.1}%", self.gpu_usage_percent)?;
        writeln!(f, "GPU temp {:.1}C", self.gpu_temperature_c)?;
        writeln!(f, "GPU power {:.1}W", self.gpu_power_watts)?;
        writeln!(f, "RAM usage {:.1}%", self.ram_usage_percent)?;
        writeln!(f, "RAM use {:.1}MB", self.ram_used_mb)?;
        writeln!(f, "NET upload speed {:.1}KB/s", self.net_upload_kbps)?;
        write!(f, "NET download speed {:.1}KB/s", self.net_download_kbps)
    }
}
