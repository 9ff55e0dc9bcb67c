//! Transient per-process state
//!
//! Unlike [`crate::store::Store`], nothing here survives a restart. The
//! context exists so the control plane can report what the loop is doing
//! right now, including byte-level progress of an in-flight download.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Raw progress counters for an in-flight download
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub url: String,
    pub file_name: Option<String>,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub started_at: DateTime<Utc>,
}

/// Progress as reported through `show_context`
///
/// All derived values are guarded: an unknown Content-Length reports 0%
/// and no ETA rather than dividing by zero.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub url: String,
    pub file_name: Option<String>,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub percent: u8,
    pub kib_per_sec: f64,
    pub seconds_left: u64,
}

impl DownloadProgress {
    fn report(&self, now: DateTime<Utc>) -> ProgressReport {
        let percent = if self.total_bytes == 0 {
            0
        } else {
            ((self.downloaded_bytes.min(self.total_bytes) * 100) / self.total_bytes) as u8
        };

        let elapsed = (now - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        let kib_per_sec = if elapsed > 0.0 {
            (self.downloaded_bytes as f64 / 1024.0) / elapsed
        } else {
            0.0
        };

        let remaining_kib = self.total_bytes.saturating_sub(self.downloaded_bytes) as f64 / 1024.0;
        let seconds_left = if kib_per_sec > 0.0 {
            (remaining_kib / kib_per_sec) as u64
        } else {
            0
        };

        ProgressReport {
            url: self.url.clone(),
            file_name: self.file_name.clone(),
            total_bytes: self.total_bytes,
            downloaded_bytes: self.downloaded_bytes,
            percent,
            kib_per_sec,
            seconds_left,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    current_url: Option<String>,
    urls_processed: u64,
    download: Option<DownloadProgress>,
}

/// Serializable copy of the context at one point in time
#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    pub current_url: Option<String>,
    pub urls_processed: u64,
    pub download: Option<ProgressReport>,
}

/// Shared handle to the agent's transient state
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<RwLock<Inner>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Marks a URL as the one currently being processed
    pub fn begin_url(&self, url: &str) {
        self.write().current_url = Some(url.to_string());
    }

    /// Clears the current URL and bumps the processed counter
    pub fn finish_url(&self) {
        let mut guard = self.write();
        guard.current_url = None;
        guard.urls_processed += 1;
    }

    pub fn start_download(&self, url: &str, file_name: Option<String>, total_bytes: u64) {
        self.write().download = Some(DownloadProgress {
            url: url.to_string(),
            file_name,
            total_bytes,
            downloaded_bytes: 0,
            started_at: Utc::now(),
        });
    }

    pub fn record_bytes(&self, bytes: u64) {
        if let Some(progress) = self.write().download.as_mut() {
            progress.downloaded_bytes += bytes;
        }
    }

    pub fn finish_download(&self) {
        self.write().download = None;
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        let guard = self.read();
        ContextSnapshot {
            current_url: guard.current_url.clone(),
            urls_processed: guard.urls_processed,
            download: guard.download.as_ref().map(|p| p.report(Utc::now())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_zero_length_download_reports_zero_percent() {
        let progress = DownloadProgress {
            url: "http://example.com/empty".to_string(),
            file_name: None,
            total_bytes: 0,
            downloaded_bytes: 0,
            started_at: Utc::now(),
        };
        let report = progress.report(Utc::now() + Duration::seconds(1));
        assert_eq!(report.percent, 0);
        assert_eq!(report.seconds_left, 0);
    }

    #[test]
    fn test_progress_math() {
        let started = Utc::now();
        let progress = DownloadProgress {
            url: "http://example.com/big".to_string(),
            file_name: Some("/tmp/big".to_string()),
            total_bytes: 2048 * 1024,
            downloaded_bytes: 1024 * 1024,
            started_at: started,
        };
        let report = progress.report(started + Duration::seconds(10));
        assert_eq!(report.percent, 50);
        // 1 MiB over 10 s is 102.4 KiB/s, leaving ~10 s for the rest
        assert!((report.kib_per_sec - 102.4).abs() < 0.1);
        assert_eq!(report.seconds_left, 10);
    }

    #[test]
    fn test_url_lifecycle() {
        let ctx = Context::new();
        ctx.begin_url("http://example.com/");
        assert_eq!(
            ctx.snapshot().current_url.as_deref(),
            Some("http://example.com/")
        );

        ctx.finish_url();
        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.current_url, None);
        assert_eq!(snapshot.urls_processed, 1);
    }

    #[test]
    fn test_download_bytes_accumulate() {
        let ctx = Context::new();
        ctx.start_download("http://example.com/f", None, 100);
        ctx.record_bytes(40);
        ctx.record_bytes(20);

        let report = ctx.snapshot().download.unwrap();
        assert_eq!(report.downloaded_bytes, 60);
        assert_eq!(report.percent, 60);

        ctx.finish_download();
        assert!(ctx.snapshot().download.is_none());
    }
}
