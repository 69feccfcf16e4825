use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(name = "indexer", author, version, about = "Ordinals Plus inscription indexer", long_about = None)]
pub struct Opts {
    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
pub enum Command {
    /// Run an indexing worker (default)
    #[clap(name = "start")]
    Start(StartCommand),
    /// Print cursor, active workers and resource counters
    #[clap(name = "stats")]
    Stats(StatsCommand),
    /// List recently recorded indexing errors
    #[clap(name = "errors")]
    Errors(ErrorsCommand),
}

#[derive(Parser, PartialEq, Clone, Debug)]
pub struct StartCommand {}

#[derive(Parser, PartialEq, Clone, Debug)]
pub struct StatsCommand {}

#[derive(Parser, PartialEq, Clone, Debug)]
pub struct ErrorsCommand {
    /// Maximum number of error records to display
    #[clap(default_value = "10")]
    pub count: usize,
}
