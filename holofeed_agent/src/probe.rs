//! Host-level counters: CPU usage, memory and interface byte totals.

#[cfg(target_os = "linux")]
use std::fs;

use sysinfo::{CpuRefreshKind, MemoryRefreshKind, Networks, RefreshKind, System};

#[cfg(target_os = "linux")]
use crate::cpu::{CpuLoad, CpuTicks};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

impl MemoryUsage {
    pub fn usage_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.used_bytes as f64 / self.total_bytes as f64 * 100.0).clamp(0.0, 100.0)
    }

    pub fn used_mb(&self) -> f64 {
        self.used_bytes as f64 / BYTES_PER_MB
    }
}

/// Cumulative bytes across the selected interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetTotals {
    pub received: u64,
    pub sent: u64,
}

pub trait HostProbe: Send {
    /// Busy share of all CPU time since the previous call, 0..=100.
    fn cpu_usage(&mut self) -> Option<f64>;
    fn memory(&mut self) -> Option<MemoryUsage>;
    fn network_totals(&mut self) -> Option<NetTotals>;
}

/// Default probe backed by persistent sysinfo handles. On Linux CPU usage comes from
/// `/proc/stat` tick deltas.
pub struct SysinfoProbe {
    sys: System,
    networks: Networks,
    interfaces: Vec<String>,
    #[cfg(target_os = "linux")]
    cpu: CpuLoad,
}

impl SysinfoProbe {
    /// `interfaces` holds name prefixes to include; empty means every interface.
    pub fn new(interfaces: Vec<String>) -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::nothing().with_cpu_usage())
            .with_memory(MemoryRefreshKind::nothing().with_ram());
        Self {
            sys: System::new_with_specifics(refresh_kind),
            networks: Networks::new_with_refreshed_list(),
            interfaces,
            #[cfg(target_os = "linux")]
            cpu: CpuLoad::new(),
        }
    }
}

impl HostProbe for SysinfoProbe {
    #[cfg(target_os = "linux")]
    fn cpu_usage(&mut self) -> Option<f64> {
        // /proc/stat first line: "cpu  user nice system idle iowait irq softirq steal ..."
        let stat = fs::read_to_string("/proc/stat").ok()?;
        let ticks = CpuTicks::parse_proc_stat(&stat)?;
        Some(self.cpu.update(ticks))
    }

    #[cfg(not(target_os = "linux"))]
    fn cpu_usage(&mut self) -> Option<f64> {
        self.sys.refresh_cpu_usage();
        let v = f64::from(self.sys.global_cpu_usage());
        v.is_finite().then_some(v)
    }

    fn memory(&mut self) -> Option<MemoryUsage> {
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        if total == 0 {
            return None;
        }
        Some(MemoryUsage {
            total_bytes: total,
            used_bytes: total.saturating_sub(self.sys.available_memory()),
        })
    }

    fn network_totals(&mut self) -> Option<NetTotals> {
        self.networks.refresh(true);
        let mut matched = false;
        let mut totals = NetTotals::default();
        for (name, data) in self.networks.iter() {
            if !interface_selected(name, &self.interfaces) {
                continue;
            }
            matched = true;
            totals.received = totals.received.saturating_add(data.total_received());
            totals.sent = totals.sent.saturating_add(data.total_transmitted());
        }
        matched.then_some(totals)
    }
}

pub fn interface_selected(name: &str, prefixes: &[String]) -> bool {
    prefixes.is_empty() || prefixes.iter().any(|p| name.starts_with(p.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_percent_and_megabytes() {
        let m = MemoryUsage {
            total_bytes: 8 * 1024 * 1024 * 1024,
            used_bytes: 2 * 1024 * 1024 * 1024,
        };
        assert_eq!(m.usage_percent(), 25.0);
        assert_eq!(m.used_mb(), 2048.0);
    }

    #[test]
    fn empty_memory_total_is_zero_percent() {
        let m = MemoryUsage {
            total_bytes: 0,
            used_bytes: 10,
        };
        assert_eq!(m.usage_percent(), 0.0);
    }

    #[test]
    fn interface_prefix_filter() {
        let all: Vec<String> = Vec::new();
        assert!(interface_selected("eth0", &all));

        let some = vec!["en".to_string(), "lo".to_string()];
        assert!(interface_selected("en0", &some));
        assert!(interface_selected("lo0", &some));
        assert!(!interface_selected("utun3", &some));
    }

    #[test]
    fn sysinfo_probe_reports_memory() {
        let mut probe = SysinfoProbe::new(Vec::new());
        let mem = probe.memory().expect("host has memory");
        assert!(mem.total_bytes > 0);
        assert!(mem.used_bytes <= mem.total_bytes);
        let usage = probe.cpu_usage().unwrap_or(0.0);
        assert!((0.0..=100.0).contains(&usage));
    }
}
