//! # Process Telemetry
//!
//! Purpose: Sample system CPU utilisation and this process's resident memory
//! on a background thread while a benchmark runs.
//!
//! Values come from `/proc`; on platforms without it every sample reads
//! "unavailable" instead of failing the run.

use std::fmt;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

/// One CPU/memory reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub cpu_percent: Option<f64>,
    pub memory_mb: Option<u64>,
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cpu_percent {
            Some(cpu) => write!(f, "{cpu:.2}")?,
            None => f.write_str("unavailable")?,
        }
        f.write_str(", ")?;
        match self.memory_mb {
            Some(mb) => write!(f, "{mb}"),
            None => f.write_str("unavailable"),
        }
    }
}

/// Cumulative jiffies from the aggregate `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

/// Background sampler; `stop` returns everything collected.
pub struct Sampler {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Vec<Sample>>,
}

impl Sampler {
    pub fn start(interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::spawn(move || {
            let mut samples = Vec::new();
            let mut previous = read_cpu_times();
            while wait_interval(&flag, interval) {
                let current = read_cpu_times();
                let sample = Sample {
                    cpu_percent: cpu_percent(previous, current),
                    memory_mb: read_resident_mb(),
                };
                debug!(%sample, "telemetry sample");
                samples.push(sample);
                previous = current;
            }
            samples
        });
        Sampler { stop, handle }
    }

    pub fn stop(self) -> Vec<Sample> {
        self.stop.store(true, Ordering::Release);
        self.handle.join().unwrap_or_default()
    }
}

/// Sleeps for `interval` in short slices; false once a stop was requested.
fn wait_interval(stop: &AtomicBool, interval: Duration) -> bool {
    let deadline = Instant::now() + interval;
    while Instant::now() < deadline {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        thread::sleep(Duration::from_millis(50).min(interval));
    }
    !stop.load(Ordering::Acquire)
}

fn read_cpu_times() -> Option<CpuTimes> {
    let stat = fs::read_to_string("/proc/stat").ok()?;
    parse_cpu_line(stat.lines().next()?)
}

fn parse_cpu_line(line: &str) -> Option<CpuTimes> {
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }
    let values: Vec<u64> = fields.map(|field| field.parse().ok()).collect::<Option<_>>()?;
    if values.len() < 4 {
        return None;
    }
    let total: u64 = values.iter().sum();
    // idle + iowait
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        busy: total.saturating_sub(idle),
        total,
    })
}

fn cpu_percent(previous: Option<CpuTimes>, current: Option<CpuTimes>) -> Option<f64> {
    let (previous, current) = (previous?, current?);
    let total = current.total.checked_sub(previous.total)?;
    if total == 0 {
        return None;
    }
    let busy = current.busy.saturating_sub(previous.busy);
    Some(busy as f64 * 100.0 / total as f64)
}

fn read_resident_mb() -> Option<u64> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss_mb(&status)
}

fn parse_vm_rss_mb(status: &str) -> Option<u64> {
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib >> 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_line_splits_busy_and_idle() {
        let times = parse_cpu_line("cpu  100 0 50 800 50 0 0 0 0 0").unwrap();
        assert_eq!(times, CpuTimes { busy: 150, total: 1000 });
        assert!(parse_cpu_line("cpu0 1 2 3 4").is_none());
        assert!(parse_cpu_line("cpu 1 x 3 4").is_none());
    }

    #[test]
    fn cpu_percent_uses_deltas() {
        let before = CpuTimes { busy: 100, total: 1000 };
        let after = CpuTimes { busy: 150, total: 1200 };
        assert_eq!(cpu_percent(Some(before), Some(after)), Some(25.0));
        assert_eq!(cpu_percent(Some(before), Some(before)), None);
        assert_eq!(cpu_percent(None, Some(after)), None);
    }

    #[test]
    fn vm_rss_is_reported_in_megabytes() {
        let status = "Name:\tbench\nVmPeak:\t  9000 kB\nVmRSS:\t   20480 kB\n";
        assert_eq!(parse_vm_rss_mb(status), Some(20));
        assert_eq!(parse_vm_rss_mb("Name:\tbench\n"), None);
    }

    #[test]
    fn unavailable_values_render_as_text() {
        let sample = Sample {
            cpu_percent: None,
            memory_mb: Some(12),
        };
        assert_eq!(sample.to_string(), "unavailable, 12");
    }

    #[test]
    fn sampler_stops_promptly() {
        let sampler = Sampler::start(Duration::from_secs(60));
        let started = Instant::now();
        assert!(sampler.stop().is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
