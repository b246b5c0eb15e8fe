use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "firehose-worker",
    version,
    about = "Buffers sensor readings from a Redis stream into Postgres"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Consume the stream until SIGINT/SIGTERM (default).
    Run,
    /// Validate JSON readings and append them to the stream.
    Append(AppendArgs),
}

#[derive(Args, Debug)]
pub struct AppendArgs {
    /// Reading bodies such as '{"id": 1, "reading": 67}'.
    #[arg(required = true)]
    pub readings: Vec<String>,
}
