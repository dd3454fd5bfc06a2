use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "relay-watch", about = "Follow a relay topic and print its events as JSON lines")]
pub struct Cli {
    /// Base URL of the relay server
    #[arg(long, default_value = "http://127.0.0.1:9300", env = "RELAY_SERVER")]
    pub server: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Short-poll the topic on a fixed interval
    Poll(PollArgs),
    /// Long-poll the topic, re-polling as soon as a response arrives
    LongPoll(FollowArgs),
    /// Follow the topic's event stream, reconnecting where it left off
    Stream(FollowArgs),
}

#[derive(Args, Clone, Debug)]
pub struct PollArgs {
    pub topic: String,

    /// Start after this sequence (default: whole backlog)
    #[arg(long)]
    pub cursor: Option<u64>,

    #[arg(long, default_value_t = 5_000)]
    pub interval_ms: u64,
}

#[derive(Args, Clone, Debug)]
pub struct FollowArgs {
    pub topic: String,

    #[arg(long)]
    pub cursor: Option<u64>,

    /// Resume an existing subscription
    #[arg(long)]
    pub subscription: Option<u64>,
}
