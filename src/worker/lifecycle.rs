use super::batch::BatchAccumulator;
use super::flush::{flush_batch, FlushOutcome};
use super::stats::IngestStats;
use super::{Worker, WorkerSettings, WorkerState};
use crate::error::WorkerError;
use crate::sink::ReadingSink;
use crate::stream::LogClient;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

impl<L, S> Worker<L, S>
where
    L: LogClient,
    S: ReadingSink,
{
    pub fn new(log: L, sink: S, settings: WorkerSettings) -> Self {
        let require_id = sink.table().requires_id();
        Self {
            log,
            sink,
            settings,
            accumulator: BatchAccumulator::new(require_id),
            stats: Arc::new(IngestStats::new()),
            state: WorkerState::Bootstrapping,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> WorkerState {
        self.state
    }

    #[cfg(test)]
    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    /// Makes sure the consumer group and sink tables exist. Any failure
    /// here means the worker never starts.
    pub async fn bootstrap(&mut self) -> Result<(), WorkerError> {
        let created = self
            .log
            .ensure_group(&self.settings.stream, &self.settings.group)
            .await?;
        if created {
            tracing::info!(
                stream = %self.settings.stream,
                group = %self.settings.group,
                "created consumer group"
            );
        } else {
            tracing::debug!(group = %self.settings.group, "consumer group already exists");
        }

        self.sink.prepare(self.settings.clear_sink).await?;
        self.state = WorkerState::Running;
        tracing::info!(
            consumer = %self.settings.consumer,
            table = self.sink.table().name(),
            buffer = self.settings.buffer_threshold,
            buffer_time_ms = self.settings.time_threshold.as_millis() as u64,
            "worker running"
        );
        Ok(())
    }

    /// Bootstraps, consumes until `cancel` fires, then drains and stops.
    ///
    /// The token is only checked between iterations, so an in-flight read
    /// or flush always completes first. On a fatal error the stream is left
    /// alone so unacknowledged entries stay recoverable.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), WorkerError> {
        if self.state == WorkerState::Bootstrapping {
            self.bootstrap().await?;
        }

        if let Err(err) = self.consume(&cancel).await {
            tracing::error!(error = %err, pending = self.accumulator.len(), "worker stopping on fatal error");
            self.sink.close().await;
            self.state = WorkerState::Stopped;
            self.stats.log_summary();
            return Err(err);
        }

        self.state = WorkerState::Draining;
        let drained = self.drain().await;
        self.sink.close().await;
        self.state = WorkerState::Stopped;
        self.stats.log_summary();
        tracing::info!("worker stopped");
        drained
    }

    async fn consume(&mut self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        while !cancel.is_cancelled() {
            let block = self.next_block_timeout();
            let entries = self
                .log
                .read(
                    &self.settings.group,
                    &self.settings.consumer,
                    &self.settings.stream,
                    self.settings.read_count,
                    block,
                )
                .await?;
            if !entries.is_empty() {
                tracing::trace!(count = entries.len(), "read entries");
                self.accumulator.ingest(entries)?;
            }

            if !self.accumulator.is_empty()
                && self
                    .accumulator
                    .should_flush(self.settings.buffer_threshold, self.settings.time_threshold)
            {
                self.flush().await?;
            }
        }
        Ok(())
    }

    async fn drain(&mut self) -> Result<(), WorkerError> {
        tracing::info!(pending = self.accumulator.len(), "shutdown requested, draining");
        if !self.accumulator.is_empty() {
            if let FlushOutcome::Discarded { len } = self.flush().await? {
                tracing::warn!(len, "final batch discarded; entries remain pending");
            }
        }
        if self.settings.clear_stream {
            self.log.delete(&self.settings.stream).await?;
            tracing::info!(stream = %self.settings.stream, "deleted stream on shutdown");
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<FlushOutcome, WorkerError> {
        let batch = self.accumulator.drain();
        flush_batch(
            &self.log,
            &self.sink,
            &self.settings.stream,
            &self.settings.group,
            batch,
            &self.stats,
        )
        .await
    }

    /// Shortens the blocking read so a buffered trickle still flushes on time.
    fn next_block_timeout(&self) -> Duration {
        let block = self.settings.block_timeout.max(Duration::from_millis(1));
        if self.accumulator.is_empty() {
            return block;
        }
        block.min(self.accumulator.time_until_due(self.settings.time_threshold))
    }
}
