use super::MemoryLogEntry;
use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const WARNING_PERCENT: u64 = 80;
const CRITICAL_PERCENT: u64 = 90;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub avg_resident_mb: f64,
    pub max_resident_mb: f64,
    pub min_resident_mb: f64,
    pub avg_limit_mb: f64,
    pub avg_usage_percentage: f64,
    pub max_usage_percentage: u64,
    pub standard_deviation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryReport {
    pub total_samples: usize,
    pub time_range: TimeRange,
    pub memory_stats: MemoryStats,
    pub warnings: usize,
    pub criticals: usize,
    pub recommendations: Vec<String>,
}

impl MemoryReport {
    /// Human-readable summary for the terminal.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str("Memory Analysis Report\n");
        out.push_str(&format!("Total samples: {}\n", self.total_samples));
        out.push_str(&format!(
            "Time range: {} to {}\n",
            self.time_range.start.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            self.time_range.end.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ));
        out.push_str(&format!("Average resident: {:.2} MB\n", self.memory_stats.avg_resident_mb));
        out.push_str(&format!("Max resident: {:.2} MB\n", self.memory_stats.max_resident_mb));
        out.push_str(&format!("Average usage: {:.2}%\n", self.memory_stats.avg_usage_percentage));
        out.push_str(&format!("Warning events: {}\n", self.warnings));
        out.push_str(&format!("Critical events: {}\n", self.criticals));
        if !self.recommendations.is_empty() {
            out.push_str("Recommendations:\n");
            for recommendation in &self.recommendations {
                out.push_str(&format!("- {}\n", recommendation));
            }
        }
        out
    }
}

/// Aggregates every `memory-*.log` file in `dir` and writes
/// `memory-analysis-YYYY-MM-DD.json` next to them.
pub fn analyze_logs(dir: &Path) -> AppResult<(MemoryReport, PathBuf)> {
    let entries = read_entries(dir)?;
    let report = build_report(&entries).ok_or_else(|| {
        AppError::NotFound(format!("no memory samples found in {}", dir.display()))
    })?;
    let report_path = dir.join(format!("memory-analysis-{}.json", Local::now().format("%Y-%m-%d")));
    std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)?;
    tracing::info!(
        samples = report.total_samples,
        report = %report_path.display(),
        "memory analysis written"
    );
    Ok((report, report_path))
}

fn read_entries(dir: &Path) -> AppResult<Vec<MemoryLogEntry>> {
    if !dir.is_dir() {
        return Err(AppError::NotFound(format!("memory log directory {} does not exist", dir.display())));
    }
    let mut files = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| is_sample_log(path))
        .collect::<Vec<_>>();
    files.sort();

    let mut entries = Vec::new();
    for path in files {
        let raw = std::fs::read_to_string(&path)?;
        for (index, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MemoryLogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(error) => tracing::warn!(
                    file = %path.display(),
                    line = index + 1,
                    error = %error,
                    "skipping malformed memory sample"
                ),
            }
        }
    }
    Ok(entries)
}

fn is_sample_log(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with("memory-") && name.ends_with(".log"))
        .unwrap_or(false)
}

fn build_report(entries: &[MemoryLogEntry]) -> Option<MemoryReport> {
    let start = entries.iter().map(|entry| entry.timestamp).min()?;
    let end = entries.iter().map(|entry| entry.timestamp).max()?;

    let resident = entries
        .iter()
        .map(|entry| entry.metrics.resident_mb)
        .collect::<Vec<_>>();
    let limits = entries
        .iter()
        .map(|entry| entry.metrics.limit_mb)
        .collect::<Vec<_>>();
    let percentages = entries
        .iter()
        .map(|entry| entry.metrics.usage_percentage)
        .collect::<Vec<_>>();

    let avg_resident_mb = average(&resident);
    let stats = MemoryStats {
        avg_resident_mb,
        max_resident_mb: resident.iter().copied().fold(f64::MIN, f64::max),
        min_resident_mb: resident.iter().copied().fold(f64::MAX, f64::min),
        avg_limit_mb: average(&limits),
        avg_usage_percentage: average(&percentages.iter().map(|value| *value as f64).collect::<Vec<_>>()),
        max_usage_percentage: percentages.iter().copied().max().unwrap_or(0),
        standard_deviation: standard_deviation(&resident, avg_resident_mb),
    };

    let criticals = percentages
        .iter()
        .filter(|value| **value >= CRITICAL_PERCENT)
        .count();
    let warnings = percentages
        .iter()
        .filter(|value| (WARNING_PERCENT..CRITICAL_PERCENT).contains(*value))
        .count();

    let recommendations = recommendations(&stats, warnings, criticals, entries.len());
    Some(MemoryReport {
        total_samples: entries.len(),
        time_range: TimeRange { start, end },
        memory_stats: stats,
        warnings,
        criticals,
        recommendations,
    })
}

fn recommendations(stats: &MemoryStats, warnings: usize, criticals: usize, total: usize) -> Vec<String> {
    let mut out = Vec::new();
    if stats.avg_usage_percentage > 70.0 {
        out.push("Consider raising the memory limit as average usage is high".to_string());
    }
    if criticals > 0 {
        out.push("Critical memory usage detected. Review the service for memory leaks".to_string());
    }
    if stats.standard_deviation > stats.avg_resident_mb * 0.3 {
        out.push("High memory usage variation detected. Consider bounding caches and buffers".to_string());
    }
    if warnings as f64 > total as f64 * 0.1 {
        out.push("Frequent memory warnings. Consider pooling or caching strategies".to_string());
    }
    out
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

// Population standard deviation.
fn standard_deviation(values: &[f64], mean: f64) -> f64 {
    let squares = values
        .iter()
        .map(|value| (value - mean).powi(2))
        .collect::<Vec<_>>();
    average(&squares).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMetrics;
    use chrono::TimeZone;

    fn entry(minute: u32, resident_mb: f64, usage_percentage: u64) -> MemoryLogEntry {
        MemoryLogEntry {
            timestamp: Utc
                .with_ymd_and_hms(2024, 2, 18, 9, minute, 0)
                .single()
                .expect("timestamp"),
            metrics: MemoryMetrics {
                resident_mb,
                virtual_mb: resident_mb * 4.0,
                limit_mb: 100.0,
                usage_percentage,
            },
        }
    }

    fn write_log(dir: &Path, name: &str, entries: &[MemoryLogEntry]) {
        let body = entries
            .iter()
            .map(|entry| serde_json::to_string(entry).expect("json"))
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(dir.join(name), format!("{}\n", body)).expect("write log");
    }

    #[test]
    fn aggregates_samples_across_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_log(dir.path(), "memory-2024-02-18.log", &[entry(5, 50.0, 50), entry(0, 82.0, 82)]);
        write_log(dir.path(), "memory-2024-02-19.log", &[entry(10, 95.0, 95)]);
        std::fs::write(dir.path().join("error.log"), "{\"not\":\"a sample\"}\n").expect("write");

        let (report, path) = analyze_logs(dir.path()).expect("report");
        assert_eq!(report.total_samples, 3);
        assert_eq!(report.warnings, 1);
        assert_eq!(report.criticals, 1);
        assert_eq!(report.memory_stats.max_resident_mb, 95.0);
        assert_eq!(report.memory_stats.min_resident_mb, 50.0);
        assert_eq!(report.memory_stats.max_usage_percentage, 95);
        assert!((report.memory_stats.avg_resident_mb - 75.666).abs() < 0.01);
        assert_eq!(report.time_range.start, entry(0, 0.0, 0).timestamp);
        assert_eq!(report.time_range.end, entry(10, 0.0, 0).timestamp);
        assert!(report
            .recommendations
            .iter()
            .any(|text| text.starts_with("Critical memory usage detected")));

        let written: MemoryReport =
            serde_json::from_str(&std::fs::read_to_string(path).expect("report file")).expect("report json");
        assert_eq!(written, report);
    }

    #[test]
    fn previous_reports_are_not_read_as_samples() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_log(dir.path(), "memory-2024-02-18.log", &[entry(0, 40.0, 40)]);
        analyze_logs(dir.path()).expect("first run");
        let (report, _) = analyze_logs(dir.path()).expect("second run");
        assert_eq!(report.total_samples, 1);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let good = serde_json::to_string(&entry(0, 40.0, 40)).expect("json");
        std::fs::write(
            dir.path().join("memory-2024-02-18.log"),
            format!("{}\n{{truncated\n\n", good),
        )
        .expect("write");
        let (report, _) = analyze_logs(dir.path()).expect("report");
        assert_eq!(report.total_samples, 1);
    }

    #[test]
    fn empty_directory_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(analyze_logs(dir.path()), Err(AppError::NotFound(_))));
        assert!(matches!(
            analyze_logs(&dir.path().join("missing")),
            Err(AppError::NotFound(_))
        ));
    }
}
