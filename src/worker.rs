mod batch;
mod flush;
mod lifecycle;
mod stats;


use crate::config::Config;
use batch::BatchAccumulator;
use stats::IngestStats;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub buffer_threshold: usize,
    pub time_threshold: Duration,
    pub read_count: usize,
    pub block_timeout: Duration,
    pub clear_stream: bool,
    pub clear_sink: bool,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            stream: config.stream_name.clone(),
            group: config.consumer_group.clone(),
            consumer: config.consumer_name.clone(),
            buffer_threshold: config.buffer,
            time_threshold: config.buffer_time,
            read_count: config.read_count,
            block_timeout: config.block_timeout(),
            clear_stream: config.clear_stream,
            clear_sink: config.clear_db,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Bootstrapping,
    Running,
    Draining,
    Stopped,
}

/// Single consume -> accumulate -> flush loop. Owns its batch for its
/// whole lifetime; nothing here is shared across tasks except the stats.
pub struct Worker<L, S> {
    log: L,
    sink: S,
    settings: WorkerSettings,
    accumulator: BatchAccumulator,
    stats: Arc<IngestStats>,
    state: WorkerState,
}
