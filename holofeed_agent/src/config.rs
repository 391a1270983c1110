//! Agent configuration from `HOLOFEED_AGENT_*` environment variables and CLI flags.
//! Flags win over the environment; both win over the defaults.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_STREAM_PATH: &str = "/sse";
pub const ENV_PREFIX: &str = "HOLOFEED_AGENT_";

pub const USAGE: &str = "\
holofeed_agent: stream host metrics as server-sent events

USAGE:
    holofeed_agent [OPTIONS]

OPTIONS:
    -p, --port <PORT>         TCP port to listen on (default 80)
        --bind <ADDR>         address to bind (default 0.0.0.0)
        --path <PATH>         stream endpoint path (default /sse)
        --interval-ms <MS>    broadcast period in milliseconds (default 1000)
        --interface <PREFIX>  only count interfaces starting with PREFIX (repeatable)
    -h, --help                print this help

Every option can also be set with HOLOFEED_AGENT_<NAME>, e.g. HOLOFEED_AGENT_PORT=8080.
";

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub stream_path: String,
    pub interval: Duration,
    pub write_timeout: Duration,
    pub shutdown_grace: Duration,
    pub sensor_timeout: Duration,
    pub interfaces: Vec<String>,
    pub temp_enabled: bool,
    pub gpu_enabled: bool,
    pub cpu_temp_command: Option<Vec<String>>,
    pub gpu_temp_command: Option<Vec<String>>,
    pub cpu_freq_command: Option<Vec<String>>,
    pub cpu_power_watts: f64,
    pub gpu_power_watts: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            interval: Duration::from_secs(1),
            write_timeout: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(5),
            sensor_timeout: Duration::from_secs(2),
            interfaces: Vec::new(),
            temp_enabled: true,
            gpu_enabled: true,
            cpu_temp_command: default_cpu_temp_command(),
            gpu_temp_command: default_gpu_temp_command(),
            cpu_freq_command: default_cpu_freq_command(),
            cpu_power_watts: 15.0,
            gpu_power_watts: 45.0,
        }
    }
}

// macOS exposes no temperatures to sysinfo without SMC tooling.
#[cfg(target_os = "macos")]
fn default_cpu_temp_command() -> Option<Vec<String>> {
    Some(vec!["osx-cpu-temp".to_string()])
}
#[cfg(not(target_os = "macos"))]
fn default_cpu_temp_command() -> Option<Vec<String>> {
    None
}
#[cfg(target_os = "macos")]
fn default_gpu_temp_command() -> Option<Vec<String>> {
    Some(vec!["istats".to_string(), "extra".to_string()])
}
#[cfg(not(target_os = "macos"))]
fn default_gpu_temp_command() -> Option<Vec<String>> {
    None
}
#[cfg(target_os = "macos")]
fn default_cpu_freq_command() -> Option<Vec<String>> {
    Some(["sysctl", "-n", "hw.cpufrequency"].map(String::from).to_vec())
}
#[cfg(not(target_os = "macos"))]
fn default_cpu_freq_command() -> Option<Vec<String>> {
    None
}

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Run(AgentConfig),
    Help,
}

impl AgentConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Reads the process environment and arguments.
    pub fn load() -> Result<Invocation, ConfigError> {
        Self::from_sources(std::env::args(), |key| std::env::var(key).ok())
    }

    /// `args` includes the program name first, as `std::env::args` does.
    pub fn from_sources<I, F>(args: I, env: F) -> Result<Invocation, ConfigError>
    where
        I: IntoIterator<Item = String>,
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = AgentConfig::default();
        cfg.apply_env(&env)?;
        if cfg.apply_args(args)? {
            return Ok(Invocation::Help);
        }
        cfg.validate()?;
        Ok(Invocation::Run(cfg))
    }

    fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, env: &F) -> Result<(), ConfigError> {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            env(&key).map(|v| (key, v))
        };
        if let Some((k, v)) = var("PORT") {
            self.port = parse_port(&k, &v)?;
        }
        if let Some((k, v)) = var("BIND") {
            self.bind = parse_value(&k, &v)?;
        }
        if let Some((_, v)) = var("PATH") {
            self.stream_path = v;
        }
        if let Some((k, v)) = var("INTERVAL_MS") {
            self.interval = parse_millis(&k, &v)?;
        }
        if let Some((k, v)) = var("WRITE_TIMEOUT_MS") {
            self.write_timeout = parse_millis(&k, &v)?;
        }
        if let Some((k, v)) = var("SHUTDOWN_GRACE_MS") {
            self.shutdown_grace = parse_millis(&k, &v)?;
        }
        if let Some((k, v)) = var("SENSOR_TIMEOUT_MS") {
            self.sensor_timeout = parse_millis(&k, &v)?;
        }
        if let Some((_, v)) = var("INTERFACES") {
            self.interfaces = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some((_, v)) = var("TEMP") {
            self.temp_enabled = v != "0";
        }
        if let Some((_, v)) = var("GPU") {
            self.gpu_enabled = v != "0";
        }
        if let Some((_, v)) = var("CPU_TEMP_CMD") {
            self.cpu_temp_command = split_command(&v);
        }
        if let Some((_, v)) = var("GPU_TEMP_CMD") {
            self.gpu_temp_command = split_command(&v);
        }
        if let Some((_, v)) = var("CPU_FREQ_CMD") {
            self.cpu_freq_command = split_command(&v);
        }
        if let Some((k, v)) = var("CPU_POWER_W") {
            self.cpu_power_watts = parse_watts(&k, &v)?;
        }
        if let Some((k, v)) = var("GPU_POWER_W") {
            self.gpu_power_watts = parse_watts(&k, &v)?;
        }
        Ok(())
    }

    /// Returns `true` when help was requested.
    fn apply_args<I: IntoIterator<Item = String>>(&mut self, args: I) -> Result<bool, ConfigError> {
        let mut it = args.into_iter();
        let _ = it.next(); // program name
        let mut cli_interfaces: Vec<String> = Vec::new();
        while let Some(a) = it.next() {
            let (flag, inline) = match a.split_once('=') {
                Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
                _ => (a.clone(), None),
            };
            let mut value = |name: &str| -> Result<String, ConfigError> {
                inline
                    .clone()
                    .or_else(|| it.next())
                    .ok_or_else(|| ConfigError::MissingValue(name.to_string()))
            };
            match flag.as_str() {
                "-h" | "--help" => return Ok(true),
                "-p" | "--port" => {
                    let v = value("--port")?;
                    self.port = parse_port("--port", &v)?;
                }
                "--bind" => {
                    let v = value("--bind")?;
                    self.bind = parse_value("--bind", &v)?;
                }
                "--path" => self.stream_path = value("--path")?,
                "--interval-ms" => {
                    let v = value("--interval-ms")?;
                    self.interval = parse_millis("--interval-ms", &v)?;
                }
                "--interface" => cli_interfaces.push(value("--interface")?),
                _ => return Err(ConfigError::UnknownArgument(a)),
            }
        }
        if !cli_interfaces.is_empty() {
            self.interfaces = cli_interfaces;
        }
        Ok(false)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.stream_path.starts_with('/') {
            return Err(ConfigError::invalid(
                "path",
                &self.stream_path,
                "must start with '/'",
            ));
        }
        if self.stream_path.contains([':', '*']) {
            return Err(ConfigError::invalid(
                "path",
                &self.stream_path,
                "must be a literal path without ':' or '*'",
            ));
        }
        for (key, d) in [
            ("interval", self.interval),
            ("write timeout", self.write_timeout),
            ("shutdown grace", self.shutdown_grace),
            ("sensor timeout", self.sensor_timeout),
        ] {
            if d.is_zero() {
                return Err(ConfigError::invalid(key, "0", "must be positive"));
            }
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, v: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    v.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::invalid(key, v, e.to_string()))
}

fn parse_port(key: &str, v: &str) -> Result<u16, ConfigError> {
    parse_value::<u16>(key, v)
}

fn parse_millis(key: &str, v: &str) -> Result<Duration, ConfigError> {
    parse_value::<u64>(key, v).map(Duration::from_millis)
}

fn parse_watts(key: &str, v: &str) -> Result<f64, ConfigError> {
    let w = parse_value::<f64>(key, v)?;
    if !w.is_finite() || w < 0.0 {
        return Err(ConfigError::invalid(key, v, "must be a non-negative number"));
    }
    Ok(w)
}

/// Whitespace-separated command line; blank disables the command.
fn split_command(v: &str) -> Option<Vec<String>> {
    let argv: Vec<String> = v.split_whitespace().map(String::from).collect();
    (!argv.is_empty()).then_some(argv)
}
