//! CPU utilisation from cumulative tick counters.

/// Cumulative tick counters for the aggregate CPU line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuTicks {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTicks {
    pub fn total(&self) -> u64 {
        [
            self.user,
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
            self.steal,
        ]
        .iter()
        .fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    pub fn idle_total(&self) -> u64 {
        self.idle.saturating_add(self.iowait)
    }

    pub fn busy(&self) -> u64 {
        self.total().saturating_sub(self.idle_total())
    }

    /// Per-category difference; categories that went backwards count as zero.
    pub fn since(&self, earlier: &CpuTicks) -> CpuTicks {
        CpuTicks {
            user: self.user.saturating_sub(earlier.user),
            nice: self.nice.saturating_sub(earlier.nice),
            system: self.system.saturating_sub(earlier.system),
            idle: self.idle.saturating_sub(earlier.idle),
            iowait: self.iowait.saturating_sub(earlier.iowait),
            irq: self.irq.saturating_sub(earlier.irq),
            softirq: self.softirq.saturating_sub(earlier.softirq),
            steal: self.steal.saturating_sub(earlier.steal),
        }
    }

    pub fn usage_percent(&self) -> f64 {
        usage_percent(self.busy(), self.total())
    }

    /// Parses the aggregate line of `/proc/stat`:
    /// `cpu  user nice system idle iowait irq softirq steal ...`.
    /// Missing trailing fields (older kernels) read as zero.
    pub fn parse_proc_stat(contents: &str) -> Option<CpuTicks> {
        let line = contents.lines().find(|l| {
            let mut it = l.split_whitespace();
            it.next() == Some("cpu")
        })?;
        let mut fields = line
            .split_whitespace()
            .skip(1)
            .take(8)
            .map(|tok| tok.parse::<u64>().ok());
        let mut next = || fields.next().flatten().unwrap_or(0);
        let ticks = CpuTicks {
            user: next(),
            nice: next(),
            system: next(),
            idle: next(),
            iowait: next(),
            irq: next(),
            softirq: next(),
            steal: next(),
        };
        (ticks.total() > 0).then_some(ticks)
    }
}

/// `busy / total * 100`, clamped to 0..=100. A zero total yields 0.0.
pub fn usage_percent(busy: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (busy as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// Tracks the previous reading so usage reflects the interval between samples.
#[derive(Debug, Default)]
pub struct CpuLoad {
    previous: Option<CpuTicks>,
}

impl CpuLoad {
    pub fn new() -> Self {
        Self::default()
    }

    /// Usage since the last call; the first call reports usage since boot.
    pub fn update(&mut self, current: CpuTicks) -> f64 {
        let usage = match self.previous {
            Some(prev) => {
                let delta = current.since(&prev);
                if delta.total() == 0 {
                    current.usage_percent()
                } else {
                    delta.usage_percent()
                }
            }
            None => current.usage_percent(),
        };
        self.previous = Some(current);
        usage
    }
}
