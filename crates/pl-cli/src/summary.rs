//! Run statistics folded from drive measurements

use std::collections::BTreeSet;
use std::fmt;

use pl_core::MAX_NUM_THREADS;
use pl_engine::DriveMeasurement;
use serde::Serialize;

/// A callback arriving this many buffer durations after the previous one
/// counts as late
const LATE_CALLBACK_FACTOR: f64 = 1.5;

/// Per processing thread statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadSummary {
    pub thread_index: usize,
    pub mean_active_partials: f64,
    pub max_active_partials: usize,
    /// Fraction of all active partials this thread rendered
    pub share: f64,
    pub cpu_numbers: BTreeSet<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub num_measurements: usize,
    pub sample_rate: f64,
    pub mean_duration_ms: f64,
    pub p99_duration_ms: f64,
    pub max_duration_ms: f64,
    /// Render duration relative to the buffer duration
    pub mean_load: f64,
    pub max_load: f64,
    pub num_late_callbacks: usize,
    pub num_dropped_measurements: u64,
    pub threads: Vec<ThreadSummary>,
}

/// Accumulates measurements as they are fetched
#[derive(Debug)]
pub struct SummaryBuilder {
    sample_rate: f64,
    durations: Vec<f64>,
    loads: Vec<f64>,
    last_host_time: Option<f64>,
    num_late_callbacks: usize,
    partial_sums: [usize; MAX_NUM_THREADS],
    partial_maxima: [usize; MAX_NUM_THREADS],
    cpu_numbers: [BTreeSet<usize>; MAX_NUM_THREADS],
}

impl SummaryBuilder {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            durations: Vec::new(),
            loads: Vec::new(),
            last_host_time: None,
            num_late_callbacks: 0,
            partial_sums: [0; MAX_NUM_THREADS],
            partial_maxima: [0; MAX_NUM_THREADS],
            cpu_numbers: std::array::from_fn(|_| BTreeSet::new()),
        }
    }

    pub fn add(&mut self, measurement: &DriveMeasurement) {
        let buffer_duration = measurement.num_frames as f64 / self.sample_rate;

        self.durations.push(measurement.duration);
        if buffer_duration > 0.0 {
            self.loads.push(measurement.duration / buffer_duration);
        }

        if let Some(last) = self.last_host_time {
            if measurement.host_time - last > LATE_CALLBACK_FACTOR * buffer_duration {
                self.num_late_callbacks += 1;
            }
        }
        self.last_host_time = Some(measurement.host_time);

        for i in 0..MAX_NUM_THREADS {
            let processed = measurement.num_active_partials_processed[i];
            self.partial_sums[i] += processed;
            self.partial_maxima[i] = self.partial_maxima[i].max(processed);
            if let Some(cpu) = measurement.cpu_numbers[i] {
                self.cpu_numbers[i].insert(cpu);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    /// Summarize the first `num_threads` thread slots
    pub fn finish(mut self, num_threads: usize, num_dropped_measurements: u64) -> RunSummary {
        let num_threads = num_threads.min(MAX_NUM_THREADS);
        let count = self.durations.len();
        let total_partials: usize = self.partial_sums.iter().sum();

        self.durations.sort_by(f64::total_cmp);

        let threads = (0..num_threads)
            .map(|i| ThreadSummary {
                thread_index: i,
                mean_active_partials: ratio(self.partial_sums[i] as f64, count as f64),
                max_active_partials: self.partial_maxima[i],
                share: ratio(self.partial_sums[i] as f64, total_partials as f64),
                cpu_numbers: std::mem::take(&mut self.cpu_numbers[i]),
            })
            .collect();

        RunSummary {
            num_measurements: count,
            sample_rate: self.sample_rate,
            mean_duration_ms: mean(&self.durations) * 1000.0,
            p99_duration_ms: percentile(&self.durations, 0.99) * 1000.0,
            max_duration_ms: self.durations.last().copied().unwrap_or(0.0) * 1000.0,
            mean_load: mean(&self.loads),
            max_load: self.loads.iter().copied().fold(0.0, f64::max),
            num_late_callbacks: self.num_late_callbacks,
            num_dropped_measurements,
            threads,
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn mean(values: &[f64]) -> f64 {
    ratio(values.iter().sum(), values.len() as f64)
}

/// Nearest-rank percentile of sorted values
fn percentile(sorted: &[f64], fraction: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (fraction * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Callbacks:      {}", self.num_measurements)?;
        writeln!(
            f,
            "Render time:    mean {:.3} ms, p99 {:.3} ms, max {:.3} ms",
            self.mean_duration_ms, self.p99_duration_ms, self.max_duration_ms
        )?;
        writeln!(
            f,
            "Load:           mean {:.1}%, max {:.1}%",
            self.mean_load * 100.0,
            self.max_load * 100.0
        )?;
        writeln!(f, "Late callbacks: {}", self.num_late_callbacks)?;
        if self.num_dropped_measurements > 0 {
            writeln!(f, "Dropped:        {}", self.num_dropped_measurements)?;
        }

        writeln!(f)?;
        writeln!(f, "Thread  Mean sines  Max sines  Share   CPUs")?;
        for thread in &self.threads {
            let cpus = if thread.cpu_numbers.is_empty() {
                "-".to_string()
            } else {
                thread
                    .cpu_numbers
                    .iter()
                    .map(usize::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            };
            writeln!(
                f,
                "{:<6}  {:>10.1}  {:>9}  {:>5.1}%  {}",
                thread.thread_index,
                thread.mean_active_partials,
                thread.max_active_partials,
                thread.share * 100.0,
                cpus
            )?;
        }
        Ok(())
    }
}
