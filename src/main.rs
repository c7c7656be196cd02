use clap::Parser;
use color_print::cformat;
use std::{net::IpAddr, path::PathBuf, process::ExitCode, sync::Arc, time::Duration};
use token_ring::{
    server::Server, AccessLog, Peer, PeerId, Poisson, ProtocolConfig, Result, Ring, TcpTransport,
    QUOTA, RATE,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// One peer of a token ring guarding a shared critical section.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Port this peer listens on; also its identifier.
    port: u16,

    /// Newline-delimited list of the ports of every peer.
    #[arg(long, default_value = "ports.txt")]
    peers: PathBuf,

    /// File every critical-section entry is appended to.
    #[arg(long, default_value = "Critical Section.txt")]
    log: PathBuf,

    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Critical-section entries across the whole ring before shutdown.
    #[arg(long, default_value_t = QUOTA)]
    quota: u32,

    /// Rate (per second) at which this peer starts wanting access.
    #[arg(long, default_value_t = RATE)]
    rate: f64,

    /// Upper bound on every remote call, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
}

async fn run(args: Args) -> Result<()> {
    let id = PeerId(args.port);
    let ring = Ring::new(token_ring::read_members(&args.peers)?)?;
    let config = ProtocolConfig::default()
        .with_quota(args.quota)
        .with_access_rate(args.rate)
        .with_rpc_timeout(Duration::from_millis(args.timeout_ms));

    let log = AccessLog::new(&args.log);
    if ring.initial_holder() == id {
        log.clear()?;
    }

    let transport = Arc::new(TcpTransport::new(args.host));
    let (peer, dispatcher) = Peer::new(id, ring, config, transport.clone(), Arc::new(log))?;
    info!(peer = %id, successor = %peer.successor(), "Starting");

    let server = Server::bind(args.host, Arc::clone(&peer)).await?;
    let server = tokio::spawn(server.run());

    transport.connect_all(peer.ring().others(id)).await;

    let poisson = Poisson::new(peer.config().access_rate, u64::from(id.0));
    let demand = tokio::spawn(Arc::clone(&peer).run_demand(poisson));

    dispatcher.run().await;

    demand.abort();
    server.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", cformat!("<red, bold>error:</red, bold> {e}"));
            ExitCode::FAILURE
        }
    }
}
