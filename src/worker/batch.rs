use crate::error::{ParseError, WorkerError};
use crate::reading::{EntryId, LogEntry, Reading, FIELD_ID};
use std::time::Duration;
use tokio::time::Instant;

/// Readings drained from the accumulator, in delivery order.
#[derive(Debug, Default)]
pub struct PendingBatch {
    pub positions: Vec<EntryId>,
    pub rows: Vec<Reading>,
}

impl PendingBatch {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn first_position(&self) -> Option<&EntryId> {
        self.positions.first()
    }

    pub fn last_position(&self) -> Option<&EntryId> {
        self.positions.last()
    }
}

#[derive(Debug)]
pub struct BatchAccumulator {
    positions: Vec<EntryId>,
    rows: Vec<Reading>,
    last_flush: Instant,
    require_id: bool,
}

impl BatchAccumulator {
    /// `require_id` rejects entries without an `id` field, for sinks that
    /// take the key from the record.
    pub fn new(require_id: bool) -> Self {
        Self {
            positions: Vec::new(),
            rows: Vec::new(),
            last_flush: Instant::now(),
            require_id,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Appends entries in order. Every entry is parsed before any is
    /// buffered, so a malformed entry leaves the accumulator untouched.
    pub fn ingest(&mut self, entries: Vec<LogEntry>) -> Result<(), WorkerError> {
        let mut parsed = Vec::with_capacity(entries.len());
        for entry in entries {
            let row = Reading::from_fields(&entry.fields).and_then(|row| {
                if self.require_id && row.id.is_none() {
                    Err(ParseError::MissingField(FIELD_ID))
                } else {
                    Ok(row)
                }
            });
            match row {
                Ok(row) => parsed.push((entry.position, row)),
                Err(source) => {
                    return Err(WorkerError::Parse {
                        position: entry.position,
                        source,
                    })
                }
            }
        }
        for (position, row) in parsed {
            self.positions.push(position);
            self.rows.push(row);
        }
        Ok(())
    }

    pub fn should_flush(&self, buffer_threshold: usize, time_threshold: Duration) -> bool {
        self.should_flush_at(Instant::now(), buffer_threshold, time_threshold)
    }

    pub fn should_flush_at(
        &self,
        now: Instant,
        buffer_threshold: usize,
        time_threshold: Duration,
    ) -> bool {
        self.positions.len() > buffer_threshold
            || now.saturating_duration_since(self.last_flush) > time_threshold
    }

    /// Time left before the time trigger fires, rounded up so the trigger
    /// has strictly passed once it elapses.
    pub fn time_until_due(&self, time_threshold: Duration) -> Duration {
        let elapsed = self.last_flush.elapsed();
        time_threshold
            .saturating_sub(elapsed)
            .saturating_add(Duration::from_millis(1))
    }

    /// Takes everything buffered so far and restarts the flush timer.
    pub fn drain(&mut self) -> PendingBatch {
        self.last_flush = Instant::now();
        PendingBatch {
            positions: std::mem::take(&mut self.positions),
            rows: std::mem::take(&mut self.rows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(position: &str, id: i64, reading: i16) -> LogEntry {
        LogEntry::from_reading(
            position,
            &Reading {
                id: Some(id),
                reading,
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn size_trigger_fires_without_waiting() {
        let mut acc = BatchAccumulator::new(true);
        let entries = (0..=3).map(|i| entry(&format!("1-{i}"), i, 1)).collect();
        acc.ingest(entries).unwrap();
        assert_eq!(acc.len(), 4);
        assert!(acc.should_flush(3, Duration::from_secs(3600)));
        assert!(!acc.should_flush(4, Duration::from_secs(3600)));
    }

    #[tokio::test(start_paused = true)]
    async fn time_trigger_fires_below_size() {
        let mut acc = BatchAccumulator::new(true);
        acc.ingest(vec![entry("1-0", 1, 1)]).unwrap();
        assert!(!acc.should_flush(100, Duration::from_secs(1)));

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(acc.should_flush(100, Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn time_threshold_is_exclusive() {
        let acc = BatchAccumulator::new(true);
        let start = Instant::now();
        assert!(!acc.should_flush_at(start + Duration::from_secs(1), 100, Duration::from_secs(1)));
        assert!(acc.should_flush_at(
            start + Duration::from_millis(1001),
            100,
            Duration::from_secs(1)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_preserves_order_and_resets() {
        let mut acc = BatchAccumulator::new(true);
        acc.ingest(vec![entry("5-0", 10, 1), entry("5-1", 11, 2)])
            .unwrap();
        acc.ingest(vec![entry("6-0", 12, 3)]).unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        let batch = acc.drain();
        assert_eq!(
            batch.positions,
            vec![EntryId::from("5-0"), EntryId::from("5-1"), EntryId::from("6-0")]
        );
        assert_eq!(
            batch.rows.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![Some(10), Some(11), Some(12)]
        );
        assert!(acc.is_empty());
        assert!(!acc.should_flush(100, Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_entry_leaves_buffer_untouched() {
        let mut acc = BatchAccumulator::new(true);
        acc.ingest(vec![entry("1-0", 1, 1)]).unwrap();

        let mut bad = entry("1-2", 3, 3);
        bad.fields.insert("reading".to_string(), "99999".to_string());
        let err = acc
            .ingest(vec![entry("1-1", 2, 2), bad])
            .unwrap_err();

        assert!(matches!(err, WorkerError::Parse { ref position, .. } if position.as_str() == "1-2"));
        assert_eq!(acc.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_id_is_only_fatal_when_required() {
        let mut anonymous = entry("1-0", 1, 7);
        anonymous.fields.remove("id");

        let mut keyed = BatchAccumulator::new(true);
        let err = keyed.ingest(vec![anonymous.clone()]).unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Parse {
                source: ParseError::MissingField("id"),
                ..
            }
        ));
        assert!(keyed.is_empty());

        let mut identity = BatchAccumulator::new(false);
        identity.ingest(vec![anonymous]).unwrap();
        assert_eq!(identity.drain().rows[0].id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_time_threshold_does_not_overflow() {
        let acc = BatchAccumulator::new(true);
        assert_eq!(acc.time_until_due(Duration::MAX), Duration::MAX);
        assert!(!acc.should_flush(100, Duration::MAX));
    }
}
