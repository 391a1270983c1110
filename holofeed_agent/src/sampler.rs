//! Builds one [`MetricSnapshot`] per call from the host probe and sensors.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::AgentConfig;
use crate::probe::{HostProbe, SysinfoProbe};
use crate::rate::{NetRates, NetworkCounterState};
use crate::sensors::{
    parse_hz_as_mhz, parse_istats_gpu_temp, parse_trimmed, CelsiusLabel, CommandSensor,
    ComponentTemperature, CpuFrequency, FirstAvailable, GpuLoad, Sensor, Unavailable,
};
use crate::types::{MetricSnapshot, FALLBACK_CPU_TEMPERATURE};

/// Anything that can produce snapshots for the broadcast loop.
pub trait SnapshotSource: Send + 'static {
    fn sample(&mut self) -> MetricSnapshot;
}

/// Placeholder power figures; nothing measures these.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerPlaceholders {
    pub cpu_watts: f64,
    pub gpu_watts: f64,
}

impl Default for PowerPlaceholders {
    fn default() -> Self {
        Self {
            cpu_watts: 15.0,
            gpu_watts: 45.0,
        }
    }
}

pub struct Sensors {
    pub cpu_temperature: Box<dyn Sensor<String>>,
    pub cpu_frequency: Box<dyn Sensor<f64>>,
    pub gpu_usage: Box<dyn Sensor<f64>>,
    pub gpu_temperature: Box<dyn Sensor<f64>>,
}

impl Sensors {
    /// All sensors silent; every field falls back.
    pub fn unavailable() -> Self {
        Self {
            cpu_temperature: Box::new(Unavailable),
            cpu_frequency: Box::new(Unavailable),
            gpu_usage: Box::new(Unavailable),
            gpu_temperature: Box::new(Unavailable),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        let timeout = config.sensor_timeout;

        let cpu_temperature: Box<dyn Sensor<String>> = if config.temp_enabled {
            let mut chain: Vec<Box<dyn Sensor<String>>> = Vec::new();
            if let Some(cmd) = command(config.cpu_temp_command.as_deref(), timeout, parse_trimmed) {
                chain.push(Box::new(cmd));
            }
            chain.push(Box::new(CelsiusLabel(ComponentTemperature::cpu())));
            Box::new(FirstAvailable::new(chain))
        } else {
            Box::new(Unavailable)
        };

        let gpu_temperature: Box<dyn Sensor<f64>> = if config.temp_enabled && config.gpu_enabled {
            let mut chain: Vec<Box<dyn Sensor<f64>>> = Vec::new();
            if let Some(cmd) = command(
                config.gpu_temp_command.as_deref(),
                timeout,
                parse_istats_gpu_temp,
            ) {
                chain.push(Box::new(cmd));
            }
            chain.push(Box::new(ComponentTemperature::gpu()));
            Box::new(FirstAvailable::new(chain))
        } else {
            Box::new(Unavailable)
        };

        let gpu_usage: Box<dyn Sensor<f64>> = if config.gpu_enabled {
            Box::new(GpuLoad::new())
        } else {
            Box::new(Unavailable)
        };

        let mut frequency: Vec<Box<dyn Sensor<f64>>> = Vec::new();
        if let Some(cmd) = command(config.cpu_freq_command.as_deref(), timeout, parse_hz_as_mhz) {
            frequency.push(Box::new(cmd));
        }
        frequency.push(Box::new(CpuFrequency::new()));

        Self {
            cpu_temperature,
            cpu_frequency: Box::new(FirstAvailable::new(frequency)),
            gpu_usage,
            gpu_temperature,
        }
    }
}

fn command<T: Send + 'static>(
    argv: Option<&[String]>,
    timeout: Duration,
    parse: fn(&str) -> Option<T>,
) -> Option<CommandSensor<T>> {
    CommandSensor::new(argv?, timeout, parse)
}

/// Owns the network counter state; only the broadcast loop drives it.
pub struct MetricSampler {
    probe: Box<dyn HostProbe>,
    sensors: Sensors,
    power: PowerPlaceholders,
    net: Option<NetworkCounterState>,
}

impl MetricSampler {
    pub fn new(probe: Box<dyn HostProbe>, sensors: Sensors, power: PowerPlaceholders) -> Self {
        Self {
            probe,
            sensors,
            power,
            net: None,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            Box::new(SysinfoProbe::new(config.interfaces.clone())),
            Sensors::from_config(config),
            PowerPlaceholders {
                cpu_watts: config.cpu_power_watts,
                gpu_watts: config.gpu_power_watts,
            },
        )
    }

    /// Same as [`SnapshotSource::sample`] with an explicit clock reading.
    pub fn sample_at(&mut self, now: Instant) -> MetricSnapshot {
        let cpu_usage_percent = percent(self.probe.cpu_usage());
        let (ram_usage_percent, ram_used_mb) = match self.probe.memory() {
            Some(m) => (percent(Some(m.usage_percent())), non_negative(m.used_mb())),
            None => {
                debug!("memory probe unavailable");
                (0.0, 0.0)
            }
        };
        let rates = self.network_rates(now);

        let cpu_temperature = self
            .sensors
            .cpu_temperature
            .read()
            .unwrap_or_else(|| FALLBACK_CPU_TEMPERATURE.to_string());
        let cpu_frequency_mhz = non_negative(self.sensors.cpu_frequency.read().unwrap_or(0.0));
        let gpu_usage_percent = percent(self.sensors.gpu_usage.read());
        let gpu_temperature_c = finite(self.sensors.gpu_temperature.read().unwrap_or(0.0));

        MetricSnapshot {
            cpu_usage_percent,
            cpu_temperature,
            cpu_frequency_mhz,
            cpu_power_watts: self.power.cpu_watts,
            gpu_usage_percent,
            gpu_temperature_c,
            gpu_power_watts: self.power.gpu_watts,
            ram_usage_percent,
            ram_used_mb,
            net_upload_kbps: non_negative(rates.upload_kbps),
            net_download_kbps: non_negative(rates.download_kbps),
        }
    }

    fn network_rates(&mut self, now: Instant) -> NetRates {
        let Some(totals) = self.probe.network_totals() else {
            debug!("network counters unavailable");
            return NetRates::default();
        };
        match self.net {
            Some(prev) => {
                let (rates, next) = prev.advance(totals.received, totals.sent, now);
                self.net = Some(next);
                rates
            }
            None => {
                self.net = Some(NetworkCounterState::new(totals.received, totals.sent, now));
                NetRates::default()
            }
        }
    }
}

impl SnapshotSource for MetricSampler {
    fn sample(&mut self) -> MetricSnapshot {
        self.sample_at(Instant::now())
    }
}

fn finite(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}

fn percent(v: Option<f64>) -> f64 {
    non_negative(v.unwrap_or(0.0)).min(100.0)
}
