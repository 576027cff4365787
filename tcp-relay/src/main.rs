use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use tcp_relay::{
    Acceptor,
    cli::{Cli, Command, ServeArgs},
    client, stats,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Publish(args) => client::run_publish(args).await?,
        Command::Listen(args) => client::run_listen(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let acceptor = Acceptor::bind(args.listen).await?;
    let addr = acceptor.local_addr()?;
    info!("relay listening on {}", addr);

    let reporter = (args.report_interval > 0).then(|| {
        stats::spawn_reporter(acceptor.relay(), Duration::from_secs(args.report_interval))
    });

    let outcome = acceptor.run_until_ctrl_c().await;
    if let Some(reporter) = reporter {
        reporter.abort();
    }
    if let Err(err) = outcome {
        warn!("relay exited with error: {err:?}");
        return Err(err.into());
    }

    Ok(())
}
