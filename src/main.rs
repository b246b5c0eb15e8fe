mod cli;
mod config;
mod error;
mod reading;
mod sink;
mod stream;
mod worker;

use crate::cli::{AppendArgs, Cli, Commands};
use crate::config::Config;
use crate::reading::IngressReading;
use crate::sink::{build_pool, PgReadingSink};
use crate::stream::{LogClient, RedisStreamLog};
use crate::worker::{Worker, WorkerSettings};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

fn init_tracing(config: &Config) -> Result<()> {
    let default_filter = if config.verbose {
        "debug,firehose_worker=debug"
    } else {
        "info,firehose_worker=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

/// Cancels `token` on the first SIGINT or SIGTERM.
fn spawn_signal_listener(token: CancellationToken) -> Result<()> {
    let mut term_signal = signal(SignalKind::terminate())?;
    let mut interrupt_signal = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = term_signal.recv() => "SIGTERM",
            _ = interrupt_signal.recv() => "SIGINT",
        };
        tracing::info!(signal = name, "shutdown signal received; finishing current iteration");
        token.cancel();
    });
    Ok(())
}

async fn bootstrap(config: &Config) -> Result<Worker<RedisStreamLog, PgReadingSink>> {
    let log = RedisStreamLog::connect(&config.redis_url)
        .await
        .context("connect to redis")?;
    let pool = build_pool(&config.database_url, config.db_pool_min, config.db_pool_max)
        .await
        .context("connect to postgres")?;
    tracing::info!(
        min = config.db_pool_min,
        max = config.db_pool_max,
        table = config.sink_table.name(),
        "postgres pool ready"
    );

    let sink = PgReadingSink::new(pool, config.sink_table);
    let mut worker = Worker::new(log, sink, WorkerSettings::from_config(config));
    worker.bootstrap().await.context("bootstrap worker")?;
    Ok(worker)
}

/// Producer path: validates each body and appends it to the stream.
async fn append_readings(config: &Config, args: AppendArgs) -> Result<()> {
    let log = RedisStreamLog::connect(&config.redis_url)
        .await
        .context("connect to redis")?;
    for body in args.readings {
        let mut bytes = body.into_bytes();
        let reading = IngressReading::from_json(&mut bytes)
            .context("parse reading")?
            .validate(Utc::now())
            .context("rejected reading")?;
        let position = log.append(&config.stream_name, &reading).await?;
        tracing::info!(id = ?reading.id, %position, "appended reading");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(&config)?;
    tracing::debug!(?config, "loaded config");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let cancel = CancellationToken::new();
            spawn_signal_listener(cancel.clone())?;

            let mut worker = bootstrap(&config).await?;
            worker.run(cancel).await?;
        }
        Commands::Append(args) => append_readings(&config, args).await?,
    }
    Ok(())
}
