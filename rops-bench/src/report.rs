//! # CSV Report
//!
//! Purpose: Collect trial results and telemetry samples into the plain CSV
//! layout written at the end of a run.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::metrics::TrialStats;
use crate::telemetry::Sample;

pub struct Report {
    host: String,
    started_at: DateTime<Utc>,
    trials: Vec<TrialStats>,
    samples: Vec<Sample>,
}

impl Report {
    pub fn new(host: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Report {
            host: host.into(),
            started_at,
            trials: Vec::new(),
            samples: Vec::new(),
        }
    }

    pub fn push_trial(&mut self, stats: TrialStats) {
        self.trials.push(stats);
    }

    pub fn set_samples(&mut self, samples: Vec<Sample>) {
        self.samples = samples;
    }

    pub fn render(&self) -> String {
        let mut csv = String::new();
        // Writing into a String cannot fail.
        let _ = writeln!(csv, "Host: {}", self.host);
        let _ = writeln!(
            csv,
            "Start time: {}",
            self.started_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let _ = writeln!(csv);
        let _ = writeln!(
            csv,
            "Median Latency (ms), Avg Latency (ms), Throughput (bytes/sec), Errors, P99 Bucket (us)"
        );
        for trial in &self.trials {
            let p99 = trial
                .p99_upper_us
                .map_or_else(|| "unavailable".to_string(), |us| us.to_string());
            let _ = writeln!(
                csv,
                "{}, {}, {}, {}, {}",
                trial.median_ms, trial.average_ms, trial.throughput_bytes_per_sec, trial.errors, p99
            );
        }
        if !self.samples.is_empty() {
            let _ = writeln!(csv);
            let _ = writeln!(csv, "CPU %, Memory (MB)");
            for sample in &self.samples {
                let _ = writeln!(csv, "{sample}");
            }
        }
        csv
    }

    pub fn write_to(&self, path: &Path) -> anyhow::Result<()> {
        fs::write(path, self.render())
            .with_context(|| format!("failed to write report to {}", path.display()))
    }
}
