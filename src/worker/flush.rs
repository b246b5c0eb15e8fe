use super::batch::PendingBatch;
use super::stats::IngestStats;
use crate::error::{SinkError, WorkerError};
use crate::reading::EntryId;
use crate::sink::ReadingSink;
use crate::stream::LogClient;
use tokio::time::Instant;

#[derive(Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    Committed { rows: u64 },
    /// Rolled back on a uniqueness violation; positions left pending.
    Discarded { len: usize },
}

/// Copies `batch` into the sink in one transaction and acknowledges its
/// positions only after the commit returns.
///
/// A uniqueness violation discards the whole batch without acknowledging
/// anything. Any other failure is returned to the caller untouched.
pub async fn flush_batch<L, S>(
    log: &L,
    sink: &S,
    stream: &str,
    group: &str,
    batch: PendingBatch,
    stats: &IngestStats,
) -> Result<FlushOutcome, WorkerError>
where
    L: LogClient + ?Sized,
    S: ReadingSink + ?Sized,
{
    debug_assert!(!batch.is_empty(), "flush_batch called with an empty batch");
    let started = Instant::now();
    let len = batch.len();
    let first = batch.first_position().map(EntryId::to_string).unwrap_or_default();
    let last = batch.last_position().map(EntryId::to_string).unwrap_or_default();
    tracing::debug!(len, %first, %last, "copying batch into sink");

    match sink.write_batch(&batch.rows).await {
        Ok(copied) => {
            tracing::debug!(len, copied, "batch committed; acknowledging");
            if let Err(err) = log.ack(stream, group, &batch.positions).await {
                stats.record_error(err.to_string());
                tracing::error!(
                    error = %err,
                    len,
                    %first,
                    %last,
                    "batch committed but acknowledgement failed"
                );
                return Err(err.into());
            }
            let elapsed = started.elapsed();
            stats.record_commit(len, elapsed);
            tracing::debug!(len, micros = elapsed.as_micros() as u64, "flushed batch");
            Ok(FlushOutcome::Committed { rows: copied })
        }
        Err(SinkError::Conflict(message)) => {
            tracing::error!(
                error = %message,
                len,
                %first,
                %last,
                "duplicate primary key found, discarding batch; entries remain pending"
            );
            stats.record_discard(len, message);
            Ok(FlushOutcome::Discarded { len })
        }
        Err(SinkError::Database(err)) => {
            stats.record_error(err.to_string());
            tracing::error!(error = %err, len, %first, %last, "failed to copy batch into sink");
            Err(err.into())
        }
    }
}
