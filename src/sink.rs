use crate::error::SinkError;
use crate::reading::Reading;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::str::FromStr;

const CREATE_READINGS: &str = r#"
    CREATE TABLE IF NOT EXISTS readings (
        id bigint PRIMARY KEY,
        reading smallint,
        "timestamp" timestamptz
    )
"#;

const CREATE_READINGS2: &str = r#"
    CREATE TABLE IF NOT EXISTS readings2 (
        id bigint GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        reading smallint,
        "timestamp" timestamptz
    )
"#;

/// Target table layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkTable {
    /// `readings`: the producer supplies `id` as primary key.
    Readings,
    /// `readings2`: `id` is an identity column, safe with many producers.
    Readings2,
}

impl SinkTable {
    pub fn name(self) -> &'static str {
        match self {
            SinkTable::Readings => "readings",
            SinkTable::Readings2 => "readings2",
        }
    }

    /// Whether every record must carry its own primary key.
    pub fn requires_id(self) -> bool {
        matches!(self, SinkTable::Readings)
    }

    fn copy_statement(self) -> &'static str {
        match self {
            SinkTable::Readings => r#"COPY readings (id, reading, "timestamp") FROM STDIN"#,
            SinkTable::Readings2 => r#"COPY readings2 (reading, "timestamp") FROM STDIN"#,
        }
    }

    fn truncate_statement(self) -> &'static str {
        match self {
            SinkTable::Readings => "TRUNCATE TABLE readings",
            SinkTable::Readings2 => "TRUNCATE TABLE readings2 RESTART IDENTITY",
        }
    }

    /// Encodes rows in COPY text format, one line per reading. A missing id
    /// is sent as `\N` and left for the primary key to reject.
    pub fn encode_rows(self, rows: &[Reading]) -> String {
        let mut out = String::with_capacity(rows.len() * 48);
        for row in rows {
            let ts = row.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);
            let line = match self {
                SinkTable::Readings => {
                    let id = row
                        .id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "\\N".to_string());
                    format!("{id}\t{}\t{ts}\n", row.reading)
                }
                SinkTable::Readings2 => format!("{}\t{ts}\n", row.reading),
            };
            out.push_str(&line);
        }
        out
    }
}

impl FromStr for SinkTable {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "readings" => Ok(SinkTable::Readings),
            "readings2" => Ok(SinkTable::Readings2),
            other => bail!("unknown sink table {other:?} (expected readings or readings2)"),
        }
    }
}

/// Transactional bulk writer for readings.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    fn table(&self) -> SinkTable;

    /// Creates the target tables if missing and optionally empties the active one.
    async fn prepare(&self, clear: bool) -> Result<(), sqlx::Error>;

    /// Copies every row inside one transaction and commits it. Either all
    /// rows are committed or none are.
    async fn write_batch(&self, rows: &[Reading]) -> Result<u64, SinkError>;

    async fn close(&self);
}

pub async fn build_pool(database_url: &str, min_connections: u32, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(min_connections.min(max_connections))
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

#[derive(Clone)]
pub struct PgReadingSink {
    pool: PgPool,
    table: SinkTable,
}

impl PgReadingSink {
    pub fn new(pool: PgPool, table: SinkTable) -> Self {
        Self { pool, table }
    }
}

#[async_trait]
impl ReadingSink for PgReadingSink {
    fn table(&self) -> SinkTable {
        self.table
    }

    async fn prepare(&self, clear: bool) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for stmt in [CREATE_READINGS, CREATE_READINGS2] {
            sqlx::query(stmt).execute(&mut *tx).await?;
        }
        if clear {
            sqlx::query(self.table.truncate_statement())
                .execute(&mut *tx)
                .await?;
            tracing::info!(table = self.table.name(), "cleared sink table on start");
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_batch(&self, rows: &[Reading]) -> Result<u64, SinkError> {
        let payload = self.table.encode_rows(rows);
        let mut tx = self.pool.begin().await?;

        let copied = async {
            let mut copy = tx.copy_in_raw(self.table.copy_statement()).await?;
            copy.send(payload.as_bytes()).await?;
            Ok::<u64, sqlx::Error>(copy.finish().await?)
        }
        .await;

        match copied {
            Ok(copied) => {
                tx.commit().await?;
                Ok(copied)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback after failed copy failed");
                }
                Err(SinkError::from_sqlx(err))
            }
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
