//! Aggregation of timing results into summary documents
//!
//! Pure functions over a slice of [`TimingResult`]s. Nothing here is cached;
//! each call recomputes from the current store contents.

use crate::timing::TimingResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Marker text used when there is nothing to summarize
pub const NO_DATA_MESSAGE: &str = "No timing data available";

/// total/average/min/max over one duration series (seconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    pub total: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
}

impl DurationStats {
    fn from_series(series: impl Iterator<Item = f64>) -> Option<Self> {
        let mut count = 0usize;
        let mut total = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for value in series {
            count += 1;
            total += value;
            min = min.min(value);
            max = max.max(value);
        }
        if count == 0 {
            return None;
        }
        Some(Self {
            total,
            average: total / count as f64,
            min,
            max,
        })
    }
}

/// Aggregate statistics for a group of calls
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub call_count: u64,
    pub wall_time: DurationStats,
    pub cpu_time: DurationStats,
}

impl Summary {
    /// Summarize a group of results; `None` when the group is empty
    pub fn from_results<'a, I>(results: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a TimingResult>,
        I::IntoIter: Clone,
    {
        let iter = results.into_iter();
        let wall_time = DurationStats::from_series(iter.clone().map(TimingResult::wall_time))?;
        let cpu_time = DurationStats::from_series(iter.clone().map(TimingResult::cpu_time))?;
        Some(Self {
            call_count: iter.count() as u64,
            wall_time,
            cpu_time,
        })
    }
}

/// Explicit marker for an empty result set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoData {
    pub message: String,
}

impl Default for NoData {
    fn default() -> Self {
        Self {
            message: NO_DATA_MESSAGE.to_string(),
        }
    }
}

/// Overall summary, or the no-data marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OverallSummary {
    Stats(Summary),
    NoData(NoData),
}

impl OverallSummary {
    pub fn stats(&self) -> Option<&Summary> {
        match self {
            OverallSummary::Stats(s) => Some(s),
            OverallSummary::NoData(_) => None,
        }
    }

    pub fn call_count(&self) -> u64 {
        self.stats().map_or(0, |s| s.call_count)
    }
}

/// One call in the detailed listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedCall {
    pub args: Vec<String>,
    pub kwargs: BTreeMap<String, String>,
    pub wall_time: f64,
    pub cpu_time: f64,
    pub timestamp: f64,
}

/// The document persisted by storage backends under `data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateDocument {
    pub overall_summary: OverallSummary,
    pub function_summaries: BTreeMap<String, Summary>,
    pub detailed_results: BTreeMap<String, Vec<DetailedCall>>,
}

impl AggregateDocument {
    pub fn total_calls(&self) -> u64 {
        self.overall_summary.call_count()
    }

    pub fn total_wall_time(&self) -> f64 {
        self.overall_summary.stats().map_or(0.0, |s| s.wall_time.total)
    }

    pub fn total_cpu_time(&self) -> f64 {
        self.overall_summary.stats().map_or(0.0, |s| s.cpu_time.total)
    }

    /// Human-readable table, sorted by total wall time (descending)
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        if self.function_summaries.is_empty() {
            out.push_str(NO_DATA_MESSAGE);
            out.push('\n');
            return out;
        }

        let mut sorted: Vec<_> = self.function_summaries.iter().collect();
        sorted.sort_by(|a, b| b.1.wall_time.total.total_cmp(&a.1.wall_time.total));

        let _ = writeln!(
            out,
            "{:<50} {:>8} {:>12} {:>12} {:>12}",
            "Function", "Calls", "Wall Total", "Wall Avg", "CPU Total"
        );
        let _ = writeln!(out, "{}", "─".repeat(98));
        for (function, s) in sorted {
            let _ = writeln!(
                out,
                "{:<50} {:>8} {:>11.6}s {:>11.6}s {:>11.6}s",
                function, s.call_count, s.wall_time.total, s.wall_time.average, s.cpu_time.total
            );
        }
        let _ = writeln!(out, "{}", "─".repeat(98));
        let _ = writeln!(
            out,
            "{:<50} {:>8} {:>11.6}s",
            "TOTAL",
            self.total_calls(),
            self.total_wall_time()
        );
        out
    }
}

/// Build the summary document for a set of results
pub fn aggregate(results: &[TimingResult]) -> AggregateDocument {
    let overall_summary = match Summary::from_results(results) {
        Some(summary) => OverallSummary::Stats(summary),
        None => OverallSummary::NoData(NoData::default()),
    };

    let mut by_function: BTreeMap<&str, Vec<&TimingResult>> = BTreeMap::new();
    for result in results {
        by_function.entry(result.function_name()).or_default().push(result);
    }

    let mut function_summaries = BTreeMap::new();
    let mut detailed_results = BTreeMap::new();
    for (name, group) in &by_function {
        if let Some(summary) = Summary::from_results(group.iter().copied()) {
            function_summaries.insert((*name).to_string(), summary);
        }
        if group.iter().any(|r| r.has_args()) {
            let calls = group
                .iter()
                .map(|r| {
                    let args = r.args().cloned().unwrap_or_default();
                    DetailedCall {
                        args: args.args,
                        kwargs: args.kwargs,
                        wall_time: r.wall_time(),
                        cpu_time: r.cpu_time(),
                        timestamp: r.timestamp(),
                    }
                })
                .collect();
            detailed_results.insert((*name).to_string(), calls);
        }
    }

    AggregateDocument {
        overall_summary,
        function_summaries,
        detailed_results,
    }
}
