use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use args::Args;
use clap::Parser;
use server::ServeConfig;
use tokio_util::sync::CancellationToken;

mod args;

const DEFAULT_LISTEN: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = config::Config::load(&args.config)?;

    if args.verbose {
        config.gateway.verbose = true;
    }

    if let Some(effort) = args.reasoning_effort {
        config.gateway.reasoning_effort = effort;
    }

    let listen_address = args
        .listen
        .or(config.server.listen_address)
        .unwrap_or(DEFAULT_LISTEN);

    let shutdown = CancellationToken::new();

    {
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    server::serve(ServeConfig {
        listen_address,
        config,
        shutdown_signal: shutdown,
        log_filter: args.log,
        version: env!("CARGO_PKG_VERSION").to_string(),
        bound_addr_sender: None,
    })
    .await
}
