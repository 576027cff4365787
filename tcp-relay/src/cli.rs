use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, broadcasting every publish to all other peers.
    Serve(ServeArgs),
    /// Connect to a relay and publish a message on a channel.
    Publish(PublishArgs),
    /// Connect to a relay and print every message it forwards.
    Listen(ListenArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:7700")]
    pub listen: SocketAddr,

    /// Seconds between throughput reports; 0 disables reporting.
    #[arg(long, default_value_t = 1)]
    pub report_interval: u64,
}

#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:7700")]
    pub server: SocketAddr,

    /// Channel name to publish on.
    #[arg(long)]
    pub channel: String,

    /// Payload text.
    #[arg(long, default_value = "")]
    pub message: String,

    /// Number of copies to publish.
    #[arg(long, default_value_t = 1)]
    pub count: usize,

    /// Delay between copies, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ListenArgs {
    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:7700")]
    pub server: SocketAddr,

    /// Exit after this many messages.
    #[arg(long)]
    pub limit: Option<usize>,
}
