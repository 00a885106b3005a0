//! Process memory monitor.
//!
//! Samples resident memory on an interval, appends one JSON line per sample to
//! a daily log file and escalates as usage crosses the configured thresholds.

pub mod analysis;

use crate::config::MemoryConfig;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Local, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub use analysis::{analyze_logs, MemoryReport};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
pub const ERROR_LOG_FILE: &str = "error.log";

static PROC_STATUS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(VmRSS|VmSize):\s+(\d+)\s+kB").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub resident_bytes: u64,
    pub virtual_bytes: u64,
}

pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> AppResult<MemorySample>;
}

/// Reads `VmRSS` and `VmSize` from a procfs status file.
#[derive(Debug, Clone)]
pub struct ProcProbe {
    status_path: PathBuf,
}

impl Default for ProcProbe {
    fn default() -> Self {
        Self {
            status_path: PathBuf::from("/proc/self/status"),
        }
    }
}

impl ProcProbe {
    pub fn with_status_path(status_path: impl Into<PathBuf>) -> Self {
        Self {
            status_path: status_path.into(),
        }
    }
}

impl MemoryProbe for ProcProbe {
    fn sample(&self) -> AppResult<MemorySample> {
        let raw = std::fs::read_to_string(&self.status_path)?;
        parse_proc_status(&raw)
    }
}

fn parse_proc_status(raw: &str) -> AppResult<MemorySample> {
    let mut resident = None;
    let mut virtual_size = None;
    for captures in PROC_STATUS_LINE.captures_iter(raw) {
        let kilobytes = captures[2]
            .parse::<u64>()
            .map_err(|error| AppError::Internal(format!("invalid proc status value: {}", error)))?;
        match &captures[1] {
            "VmRSS" => resident = Some(kilobytes * 1024),
            _ => virtual_size = Some(kilobytes * 1024),
        }
    }
    match (resident, virtual_size) {
        (Some(resident_bytes), Some(virtual_bytes)) => Ok(MemorySample {
            resident_bytes,
            virtual_bytes,
        }),
        _ => Err(AppError::Internal("proc status is missing VmRSS or VmSize".to_string())),
    }
}

/// Something that can give cached memory back when asked.
pub trait Reclaim: Send + Sync {
    fn name(&self) -> &str;
    fn reclaim(&self) -> AppResult<()>;
}

impl Reclaim for Database {
    fn name(&self) -> &str {
        "database"
    }

    fn reclaim(&self) -> AppResult<()> {
        self.reclaim_memory()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetrics {
    pub resident_mb: f64,
    pub virtual_mb: f64,
    pub limit_mb: f64,
    pub usage_percentage: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryLogEntry {
    pub timestamp: DateTime<Utc>,
    pub metrics: MemoryMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAction {
    Normal,
    Warning,
    Critical,
    Shutdown,
}

pub struct MemoryMonitor {
    config: MemoryConfig,
    log_dir: PathBuf,
    probe: Arc<dyn MemoryProbe>,
    reclaimers: Vec<Arc<dyn Reclaim>>,
    shutdown: Arc<Notify>,
    shutdown_requested: AtomicBool,
}

impl MemoryMonitor {
    pub fn new(config: MemoryConfig, log_dir: PathBuf, probe: Arc<dyn MemoryProbe>) -> AppResult<Self> {
        std::fs::create_dir_all(&log_dir)?;
        Ok(Self {
            config,
            log_dir,
            probe,
            reclaimers: Vec::new(),
            shutdown: Arc::new(Notify::new()),
            shutdown_requested: AtomicBool::new(false),
        })
    }

    pub fn with_reclaimer(mut self, reclaimer: Arc<dyn Reclaim>) -> Self {
        self.reclaimers.push(reclaimer);
        self
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Notified once usage crosses the exit threshold.
    pub fn shutdown_signal(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Takes one sample, logs it and reacts to the thresholds.
    pub fn check(&self) -> AppResult<MemoryAction> {
        let sample = self.probe.sample()?;
        let entry = self.entry_for(sample, Utc::now());
        if let Err(error) = self.append_sample(&entry, Local::now()) {
            tracing::warn!(error = %error, log_dir = %self.log_dir.display(), "failed to write memory sample");
        }

        let ratio = sample.resident_bytes as f64 / self.config.limit_bytes() as f64;
        if ratio > self.config.critical_threshold {
            tracing::error!(
                usage_percentage = entry.metrics.usage_percentage,
                resident_mb = entry.metrics.resident_mb,
                "critical memory usage"
            );
            if let Err(error) = self.perform_cleanup() {
                tracing::warn!(error = %error, "memory cleanup failed");
            }
            if ratio > self.config.exit_threshold {
                tracing::error!(
                    usage_percentage = entry.metrics.usage_percentage,
                    "memory usage above exit threshold, requesting shutdown"
                );
                self.shutdown_requested.store(true, Ordering::SeqCst);
                self.shutdown.notify_one();
                return Ok(MemoryAction::Shutdown);
            }
            return Ok(MemoryAction::Critical);
        }
        if ratio > self.config.warning_threshold {
            tracing::warn!(
                usage_percentage = entry.metrics.usage_percentage,
                resident_mb = entry.metrics.resident_mb,
                "memory usage warning"
            );
            self.reclaim_all();
            return Ok(MemoryAction::Warning);
        }
        Ok(MemoryAction::Normal)
    }

    /// Reclaims memory and removes log files older than the retention period.
    /// Returns how many files were removed.
    pub fn perform_cleanup(&self) -> AppResult<usize> {
        self.reclaim_all();
        let retention = self
            .config
            .retention_days
            .checked_mul(24 * 60 * 60)
            .map(Duration::from_secs)
            .unwrap_or(Duration::MAX);
        let cutoff = SystemTime::now()
            .checked_sub(retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let removed = prune_older_than(&self.log_dir, cutoff)?;
        if removed > 0 {
            tracing::info!(removed, log_dir = %self.log_dir.display(), "old memory logs removed");
        }
        Ok(removed)
    }

    /// Starts the sampling and cleanup loops.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let poll = tokio::spawn({
            let monitor = self.clone();
            async move {
                let mut interval = tokio::time::interval(monitor.config.poll_interval());
                loop {
                    interval.tick().await;
                    if let Err(error) = monitor.check() {
                        tracing::warn!(error = %error, "memory sample failed");
                    }
                }
            }
        });

        let cleanup = tokio::spawn({
            let monitor = self;
            async move {
                let mut interval = tokio::time::interval(monitor.config.cleanup_interval());
                // The first tick completes immediately.
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if let Err(error) = monitor.perform_cleanup() {
                        tracing::warn!(error = %error, "memory cleanup failed");
                    }
                }
            }
        });

        vec![poll, cleanup]
    }

    fn entry_for(&self, sample: MemorySample, timestamp: DateTime<Utc>) -> MemoryLogEntry {
        let limit_bytes = self.config.limit_bytes();
        let usage = sample.resident_bytes as f64 / limit_bytes as f64;
        MemoryLogEntry {
            timestamp,
            metrics: MemoryMetrics {
                resident_mb: bytes_to_mb(sample.resident_bytes),
                virtual_mb: bytes_to_mb(sample.virtual_bytes),
                limit_mb: bytes_to_mb(limit_bytes),
                usage_percentage: (usage * 100.0).round() as u64,
            },
        }
    }

    fn append_sample(&self, entry: &MemoryLogEntry, now: DateTime<Local>) -> AppResult<()> {
        let path = self
            .log_dir
            .join(format!("memory-{}.log", now.format("%Y-%m-%d")));
        append_json_line(&path, entry)
    }

    fn reclaim_all(&self) {
        for reclaimer in &self.reclaimers {
            if let Err(error) = reclaimer.reclaim() {
                tracing::warn!(reclaimer = reclaimer.name(), error = %error, "memory reclaim failed");
            }
        }
    }
}

fn bytes_to_mb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_MB * 100.0).round() / 100.0
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

// Entries that vanish or cannot be inspected are skipped; the rest are still pruned.
fn prune_older_than(dir: &Path, cutoff: SystemTime) -> AppResult<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let Ok(entry) = entry else {
            continue;
        };
        let path = entry.path();
        let expired = entry
            .metadata()
            .and_then(|metadata| Ok(metadata.is_file() && metadata.modified()? < cutoff));
        match expired {
            Ok(true) => match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => {
                    tracing::warn!(file = %path.display(), error = %error, "failed to remove old memory log");
                }
            },
            Ok(false) => {}
            Err(error) => {
                tracing::debug!(file = %path.display(), error = %error, "skipping unreadable memory log entry");
            }
        }
    }
    Ok(removed)
}

#[derive(Debug, Serialize)]
struct ErrorLogEntry<'a> {
    timestamp: DateTime<Utc>,
    error: ErrorDetails<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorDetails<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory: Option<MemoryUsageSnapshot>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MemoryUsageSnapshot {
    resident_mb: f64,
    virtual_mb: f64,
}

/// Appends one `{timestamp, error}` line to `error.log` in `dir`.
pub fn record_error(dir: &Path, message: &str, location: Option<String>, probe: &dyn MemoryProbe) -> AppResult<()> {
    let memory = probe.sample().ok().map(|sample| MemoryUsageSnapshot {
        resident_mb: bytes_to_mb(sample.resident_bytes),
        virtual_mb: bytes_to_mb(sample.virtual_bytes),
    });
    let entry = ErrorLogEntry {
        timestamp: Utc::now(),
        error: ErrorDetails {
            message,
            location,
            memory,
        },
    };
    append_json_line(&dir.join(ERROR_LOG_FILE), &entry)
}

/// Chains a panic hook that records every panic in `error.log`.
pub fn install_panic_log(dir: PathBuf, probe: Arc<dyn MemoryProbe>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let message = if let Some(text) = info.payload().downcast_ref::<&str>() {
            text.to_string()
        } else if let Some(text) = info.payload().downcast_ref::<String>() {
            text.clone()
        } else {
            "panic".to_string()
        };
        let location = info
            .location()
            .map(|location| format!("{}:{}", location.file(), location.line()));
        if let Err(error) = record_error(&dir, &message, location, probe.as_ref()) {
            tracing::warn!(error = %error, "failed to record panic");
        }
        previous(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct FixedProbe(Mutex<MemorySample>);

    impl FixedProbe {
        fn resident_mb(mb: u64) -> Self {
            Self(Mutex::new(MemorySample {
                resident_bytes: mb * 1024 * 1024,
                virtual_bytes: mb * 4 * 1024 * 1024,
            }))
        }
    }

    impl MemoryProbe for FixedProbe {
        fn sample(&self) -> AppResult<MemorySample> {
            Ok(*self.0.lock().expect("probe lock"))
        }
    }

    #[derive(Default)]
    struct CountingReclaimer(AtomicUsize);

    impl Reclaim for CountingReclaimer {
        fn name(&self) -> &str {
            "counting"
        }

        fn reclaim(&self) -> AppResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn monitor(dir: &Path, resident_mb: u64, reclaimer: Arc<CountingReclaimer>) -> MemoryMonitor {
        let config = MemoryConfig {
            max_memory_mb: 100,
            ..MemoryConfig::default()
        };
        MemoryMonitor::new(config, dir.to_path_buf(), Arc::new(FixedProbe::resident_mb(resident_mb)))
            .expect("monitor")
            .with_reclaimer(reclaimer)
    }

    #[test]
    fn parses_proc_status_kilobytes() {
        let raw = "Name:\tfinadvise\nVmPeak:\t  9000 kB\nVmSize:\t  8192 kB\nVmRSS:\t  2048 kB\n";
        let sample = parse_proc_status(raw).expect("sample");
        assert_eq!(sample.resident_bytes, 2048 * 1024);
        assert_eq!(sample.virtual_bytes, 8192 * 1024);
        assert!(parse_proc_status("Name:\tfinadvise\n").is_err());
    }

    #[test]
    fn normal_usage_only_logs_the_sample() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reclaimer = Arc::new(CountingReclaimer::default());
        let monitor = monitor(dir.path(), 50, reclaimer.clone());

        assert_eq!(monitor.check().expect("check"), MemoryAction::Normal);
        assert_eq!(reclaimer.0.load(Ordering::SeqCst), 0);

        let log_file = dir
            .path()
            .join(format!("memory-{}.log", Local::now().format("%Y-%m-%d")));
        let raw = std::fs::read_to_string(log_file).expect("memory log");
        let entry: MemoryLogEntry = serde_json::from_str(raw.trim()).expect("json line");
        assert_eq!(entry.metrics.usage_percentage, 50);
        assert_eq!(entry.metrics.resident_mb, 50.0);
        assert_eq!(entry.metrics.limit_mb, 100.0);
    }

    #[test]
    fn warning_usage_asks_reclaimers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reclaimer = Arc::new(CountingReclaimer::default());
        let monitor = monitor(dir.path(), 85, reclaimer.clone());

        assert_eq!(monitor.check().expect("check"), MemoryAction::Warning);
        assert_eq!(reclaimer.0.load(Ordering::SeqCst), 1);
        assert!(!monitor.shutdown_requested());
    }

    #[test]
    fn critical_usage_cleans_up_without_shutdown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reclaimer = Arc::new(CountingReclaimer::default());
        let monitor = monitor(dir.path(), 92, reclaimer.clone());

        assert_eq!(monitor.check().expect("check"), MemoryAction::Critical);
        assert_eq!(reclaimer.0.load(Ordering::SeqCst), 1);
        assert!(!monitor.shutdown_requested());
    }

    #[tokio::test]
    async fn usage_above_exit_threshold_requests_shutdown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let monitor = monitor(dir.path(), 97, Arc::new(CountingReclaimer::default()));
        let signal = monitor.shutdown_signal();

        assert_eq!(monitor.check().expect("check"), MemoryAction::Shutdown);
        assert!(monitor.shutdown_requested());
        tokio::time::timeout(Duration::from_secs(1), signal.notified())
            .await
            .expect("shutdown notified");
    }

    #[tokio::test]
    async fn shutdown_still_requested_when_log_dir_is_gone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log_dir = dir.path().join("memory");
        let reclaimer = Arc::new(CountingReclaimer::default());
        let monitor = monitor(&log_dir, 99, reclaimer.clone());
        std::fs::remove_dir_all(&log_dir).expect("remove log dir");

        assert_eq!(monitor.check().expect("check"), MemoryAction::Shutdown);
        assert!(monitor.shutdown_requested());
        assert_eq!(reclaimer.0.load(Ordering::SeqCst), 1);
        tokio::time::timeout(Duration::from_secs(1), monitor.shutdown_signal().notified())
            .await
            .expect("shutdown notified");
    }

    #[test]
    fn huge_retention_does_not_overflow() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("memory-old.log"), "{}\n").expect("write");
        let config = MemoryConfig {
            retention_days: u64::MAX,
            ..MemoryConfig::default()
        };
        let monitor = MemoryMonitor::new(config, dir.path().to_path_buf(), Arc::new(FixedProbe::resident_mb(1)))
            .expect("monitor");
        assert_eq!(monitor.perform_cleanup().expect("cleanup"), 0);
        assert!(dir.path().join("memory-old.log").exists());
    }

    #[test]
    fn proc_probe_reads_configured_status_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let status = dir.path().join("status");
        std::fs::write(&status, "VmSize:\t  4096 kB\nVmRSS:\t  1024 kB\n").expect("write");
        let sample = ProcProbe::with_status_path(&status).sample().expect("sample");
        assert_eq!(sample.resident_bytes, 1024 * 1024);
        assert_eq!(sample.virtual_bytes, 4096 * 1024);
        assert!(ProcProbe::with_status_path(dir.path().join("missing")).sample().is_err());
    }

    #[test]
    fn cleanup_keeps_recent_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("memory-recent.log"), "{}\n").expect("write");
        let monitor = monitor(dir.path(), 10, Arc::new(CountingReclaimer::default()));

        assert_eq!(monitor.perform_cleanup().expect("cleanup"), 0);
        assert!(dir.path().join("memory-recent.log").exists());

        let future = SystemTime::now() + Duration::from_secs(60);
        assert_eq!(prune_older_than(dir.path(), future).expect("prune"), 1);
        assert!(!dir.path().join("memory-recent.log").exists());
    }

    #[test]
    fn record_error_appends_json_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let probe = FixedProbe::resident_mb(12);
        record_error(dir.path(), "boom", Some("src/api.rs:10".to_string()), &probe).expect("record");
        record_error(dir.path(), "again", None, &probe).expect("record");

        let raw = std::fs::read_to_string(dir.path().join(ERROR_LOG_FILE)).expect("error log");
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|line| serde_json::from_str(line).expect("json"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["error"]["message"], "boom");
        assert_eq!(lines[0]["error"]["location"], "src/api.rs:10");
        assert_eq!(lines[0]["error"]["memory"]["residentMb"], 12.0);
        assert!(lines[1]["error"].get("location").is_none());
    }
}
