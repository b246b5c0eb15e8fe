use crate::reading::{EntryId, LogEntry, Reading};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisResult};
use std::collections::HashMap;
use std::time::Duration;

/// Cursor for entries never delivered to any consumer of the group.
const NEW_ENTRIES: &str = ">";

/// Consumer-group view of the ordered log.
#[async_trait]
pub trait LogClient: Send + Sync {
    /// Creates `group` at the start of `stream` (creating the stream too).
    /// Returns `false` when the group already existed.
    async fn ensure_group(&self, stream: &str, group: &str) -> RedisResult<bool>;

    /// Blocks up to `block` for undelivered entries. An empty result means
    /// the timeout elapsed.
    async fn read(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
        count: usize,
        block: Duration,
    ) -> RedisResult<Vec<LogEntry>>;

    /// Removes `positions` from the group's pending-entries list.
    async fn ack(&self, stream: &str, group: &str, positions: &[EntryId]) -> RedisResult<u64>;

    async fn delete(&self, stream: &str) -> RedisResult<()>;

    async fn append(&self, stream: &str, reading: &Reading) -> RedisResult<EntryId>;
}

#[derive(Clone)]
pub struct RedisStreamLog {
    conn: ConnectionManager,
}

impl RedisStreamLog {
    pub async fn connect(url: &str) -> RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl LogClient for RedisStreamLog {
    async fn ensure_group(&self, stream: &str, group: &str) -> RedisResult<bool> {
        let mut conn = self.conn.clone();
        match conn
            .xgroup_create_mkstream::<_, _, _, ()>(stream, group, "0")
            .await
        {
            Ok(()) => Ok(true),
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn read(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
        count: usize,
        block: Duration,
    ) -> RedisResult<Vec<LogEntry>> {
        let mut conn = self.conn.clone();
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[stream], &[NEW_ENTRIES], &options)
            .await?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                let mut fields = HashMap::with_capacity(id.map.len());
                for (name, value) in &id.map {
                    fields.insert(name.clone(), redis::from_redis_value::<String>(value)?);
                }
                entries.push(LogEntry::new(id.id, fields));
            }
        }
        Ok(entries)
    }

    async fn ack(&self, stream: &str, group: &str, positions: &[EntryId]) -> RedisResult<u64> {
        if positions.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let ids: Vec<&str> = positions.iter().map(EntryId::as_str).collect();
        conn.xack(stream, group, ids.as_slice()).await
    }

    async fn delete(&self, stream: &str) -> RedisResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, u64>(stream).await?;
        Ok(())
    }

    async fn append(&self, stream: &str, reading: &Reading) -> RedisResult<EntryId> {
        let mut conn = self.conn.clone();
        let fields = reading.to_fields();
        let id: String = conn.xadd(stream, "*", fields.as_slice()).await?;
        Ok(EntryId::from(id))
    }
}
