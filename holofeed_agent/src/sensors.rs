//! Best-effort sensors: temperatures, CPU frequency and GPU load.
//!
//! Every sensor answers `Option`; the sampler substitutes its own fallback when a
//! sensor has nothing to say. Failures are reported once at warn level and at debug
//! afterwards so a missing tool does not flood the log every tick.

use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use gfxinfo::active_gpu;
use sysinfo::{Components, CpuRefreshKind, RefreshKind, System};
use tracing::{debug, warn};

pub trait Sensor<T>: Send {
    fn read(&mut self) -> Option<T>;
}

/// Always answers the same value.
#[derive(Debug, Clone)]
pub struct Fixed<T>(pub T);

impl<T: Clone + Send> Sensor<T> for Fixed<T> {
    fn read(&mut self) -> Option<T> {
        Some(self.0.clone())
    }
}

/// Never answers; used when a sensor family is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

impl<T> Sensor<T> for Unavailable {
    fn read(&mut self) -> Option<T> {
        None
    }
}

/// Tries each sensor in order and returns the first reading.
pub struct FirstAvailable<T> {
    sensors: Vec<Box<dyn Sensor<T>>>,
}

impl<T> FirstAvailable<T> {
    pub fn new(sensors: Vec<Box<dyn Sensor<T>>>) -> Self {
        Self { sensors }
    }
}

impl<T: Send> Sensor<T> for FirstAvailable<T> {
    fn read(&mut self) -> Option<T> {
        self.sensors.iter_mut().find_map(|s| s.read())
    }
}

/// Renders a numeric temperature as the display label, e.g. `61.5°C`.
pub struct CelsiusLabel<S>(pub S);

impl<S: Sensor<f64>> Sensor<String> for CelsiusLabel<S> {
    fn read(&mut self) -> Option<String> {
        self.0.read().map(|c| format!("{c:.1}°C"))
    }
}

pub const CPU_LABELS: &[&str] = &["cpu", "package", "tctl", "tdie"];
pub const GPU_LABELS: &[&str] = &["gpu", "amdgpu", "edge", "junction", "nouveau"];

/// Hottest sysinfo component whose label contains one of `needles`.
pub struct ComponentTemperature {
    components: Components,
    needles: &'static [&'static str],
}

impl ComponentTemperature {
    pub fn new(needles: &'static [&'static str]) -> Self {
        Self {
            components: Components::new_with_refreshed_list(),
            needles,
        }
    }

    pub fn cpu() -> Self {
        Self::new(CPU_LABELS)
    }

    pub fn gpu() -> Self {
        Self::new(GPU_LABELS)
    }
}

impl Sensor<f64> for ComponentTemperature {
    fn read(&mut self) -> Option<f64> {
        self.components.refresh(false);
        let needles = self.needles;
        self.components
            .iter()
            .filter(|c| label_matches(c.label(), needles))
            .filter_map(|c| c.temperature())
            .filter(|t| t.is_finite())
            .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(f64::from)
    }
}

fn label_matches(label: &str, needles: &[&str]) -> bool {
    let l = label.to_ascii_lowercase();
    needles.iter().any(|n| l.contains(n))
}

/// Average current frequency across logical CPUs, in MHz.
pub struct CpuFrequency {
    sys: System,
}

impl CpuFrequency {
    pub fn new() -> Self {
        let refresh = RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing().with_frequency());
        Self {
            sys: System::new_with_specifics(refresh),
        }
    }
}

impl Default for CpuFrequency {
    fn default() -> Self {
        Self::new()
    }
}

impl Sensor<f64> for CpuFrequency {
    fn read(&mut self) -> Option<f64> {
        self.sys.refresh_cpu_frequency();
        let cpus = self.sys.cpus();
        if cpus.is_empty() {
            return None;
        }
        let sum: u64 = cpus.iter().map(|c| c.frequency()).sum();
        let avg = sum as f64 / cpus.len() as f64;
        (avg > 0.0).then_some(avg)
    }
}

/// Load of the active GPU via gfxinfo. The first failed probe marks the GPU absent
/// and later reads short-circuit.
#[derive(Debug, Default)]
pub struct GpuLoad {
    present: Option<bool>,
}

impl GpuLoad {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Sensor<f64> for GpuLoad {
    fn read(&mut self) -> Option<f64> {
        if self.present == Some(false) {
            return None;
        }
        match active_gpu() {
            Ok(gpu) => {
                self.present = Some(true);
                Some(gpu.info().load_pct() as f64)
            }
            Err(e) => {
                if self.present.is_none() {
                    warn!("gpu probe failed, reporting fallback usage: {e}");
                } else {
                    debug!("gpu collection failed: {e}");
                }
                self.present = Some(false);
                None
            }
        }
    }
}

/// Runs an external tool and parses its stdout.
pub struct CommandSensor<T> {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    parse: fn(&str) -> Option<T>,
    warned: bool,
}

impl<T> CommandSensor<T> {
    /// `argv` is the full command line; returns `None` when it is empty.
    pub fn new(argv: &[String], timeout: Duration, parse: fn(&str) -> Option<T>) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
            parse,
            warned: false,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn report(&mut self, msg: std::fmt::Arguments<'_>) {
        if self.warned {
            debug!("{}: {}", self.program, msg);
        } else {
            warn!("{}: {} (falling back)", self.program, msg);
            self.warned = true;
        }
    }
}

impl<T: Send> Sensor<T> for CommandSensor<T> {
    fn read(&mut self) -> Option<T> {
        match run_with_timeout(&self.program, &self.args, self.timeout) {
            Ok(out) => {
                let parsed = (self.parse)(&out);
                if parsed.is_none() {
                    self.report(format_args!("unrecognised output {:?}", out.trim()));
                }
                parsed
            }
            Err(e) => {
                self.report(format_args!("{e}"));
                None
            }
        }
    }
}

const COMMAND_POLL: Duration = Duration::from_millis(10);

/// Spawns `program`, waits at most `timeout`, and returns its stdout. The child is
/// killed when the deadline passes. Stdout is drained while the child runs so a
/// chatty tool cannot stall on a full pipe.
pub fn run_with_timeout(program: &str, args: &[String], timeout: Duration) -> io::Result<String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;
    let deadline = Instant::now() + timeout;
    let timed_out =
        || io::Error::new(io::ErrorKind::TimedOut, format!("no answer within {timeout:?}"));

    let (tx, rx) = mpsc::channel();
    if let Some(mut stdout) = child.stdout.take() {
        thread::spawn(move || {
            let mut out = Vec::new();
            let _ = tx.send(stdout.read_to_end(&mut out).map(|_| out));
        });
    }

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(timed_out());
        }
        thread::sleep(COMMAND_POLL);
    };
    if !status.success() {
        return Err(io::Error::other(format!("exited with {status}")));
    }
    // A background grandchild may keep the pipe open past the child's exit.
    let out = match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(res) => res?,
        Err(RecvTimeoutError::Timeout) => return Err(timed_out()),
        Err(RecvTimeoutError::Disconnected) => Vec::new(),
    };
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Whole trimmed output, e.g. `osx-cpu-temp` printing `61.5°C`.
pub fn parse_trimmed(out: &str) -> Option<String> {
    let t = out.trim();
    (!t.is_empty()).then(|| t.to_string())
}

/// GPU temperature from `istats extra` output, which contains a line like
/// `GPU: 55.0°C`.
pub fn parse_istats_gpu_temp(out: &str) -> Option<f64> {
    let (_, rest) = out.split_once("GPU: ")?;
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(rest.len());
    rest[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}

/// A frequency printed in Hz (`sysctl -n hw.cpufrequency`), converted to MHz.
pub fn parse_hz_as_mhz(out: &str) -> Option<f64> {
    out.split_whitespace()
        .next()?
        .parse::<f64>()
        .ok()
        .filter(|hz| hz.is_finite() && *hz > 0.0)
        .map(|hz| hz / 1_000_000.0)
}

/// Whether `program` resolves to a file on `PATH` (or is an existing path itself).
pub fn command_available(program: &str) -> bool {
    let p = std::path::Path::new(program);
    if p.components().count() > 1 {
        return p.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}
