use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct IngestStats {
    pub batches_flushed: AtomicU64,
    pub rows_committed: AtomicU64,
    pub batches_discarded: AtomicU64,
    pub rows_discarded: AtomicU64,
    pub last_batch_len: AtomicU64,
    pub last_flush_unix_ms: AtomicU64,
    pub average_flush_micros: AtomicU64,
    pub last_error: Mutex<Option<String>>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_commit(&self, len: usize, elapsed: Duration) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.rows_committed.fetch_add(len as u64, Ordering::Relaxed);
        self.last_batch_len.store(len as u64, Ordering::Relaxed);
        let now = Utc::now().timestamp_millis() as u64;
        self.last_flush_unix_ms.store(now, Ordering::Relaxed);
        let micros = elapsed.as_micros() as u64;
        let prev = self.average_flush_micros.load(Ordering::Relaxed);
        let avg = if prev == 0 { micros } else { (prev + micros) / 2 };
        self.average_flush_micros.store(avg, Ordering::Relaxed);
        self.clear_error();
    }

    pub fn record_discard(&self, len: usize, reason: impl Into<String>) {
        self.batches_discarded.fetch_add(1, Ordering::Relaxed);
        self.rows_discarded.fetch_add(len as u64, Ordering::Relaxed);
        self.record_error(reason);
    }

    pub fn record_error(&self, err: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn clear_error(&self) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    pub fn log_summary(&self) {
        let last_error = self.last_error.lock().ok().and_then(|e| e.clone());
        tracing::info!(
            batches_flushed = self.batches_flushed.load(Ordering::Relaxed),
            rows_committed = self.rows_committed.load(Ordering::Relaxed),
            batches_discarded = self.batches_discarded.load(Ordering::Relaxed),
            rows_discarded = self.rows_discarded.load(Ordering::Relaxed),
            average_flush_micros = self.average_flush_micros.load(Ordering::Relaxed),
            last_batch_len = self.last_batch_len.load(Ordering::Relaxed),
            last_flush_unix_ms = self.last_flush_unix_ms.load(Ordering::Relaxed),
            last_error = last_error.as_deref().unwrap_or(""),
            "ingest stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_clears_previous_error() {
        let stats = IngestStats::new();
        stats.record_discard(3, "duplicate key");
        assert_eq!(stats.rows_discarded.load(Ordering::Relaxed), 3);
        assert!(stats.last_error.lock().unwrap().is_some());

        stats.record_commit(5, Duration::from_micros(400));
        stats.record_commit(2, Duration::from_micros(200));
        assert_eq!(stats.batches_flushed.load(Ordering::Relaxed), 2);
        assert_eq!(stats.rows_committed.load(Ordering::Relaxed), 7);
        assert_eq!(stats.last_batch_len.load(Ordering::Relaxed), 2);
        assert!(stats.last_flush_unix_ms.load(Ordering::Relaxed) > 0);
        assert_eq!(stats.average_flush_micros.load(Ordering::Relaxed), 300);
        assert!(stats.last_error.lock().unwrap().is_none());
    }
}
