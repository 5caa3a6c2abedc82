// =============================================================================
// pulsenet-node — standalone PulseNet node binary
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use pulsenet_core::host::{Host, HostId};
use pulsenet_core::transport::{Transport, TransportConfig};
use pulsenet_core::HostHandler;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:23137";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let listen_addr = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PULSENET_LISTEN").ok())
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
        .parse()?;

    let config = TransportConfig::new(listen_addr);
    let transport = Transport::bind(config).await?;
    let origin = Host::new(HostId::random(), transport.local_addr());
    log::info!("🚀 node {} listening on {}", origin.id, origin.addr);

    let handler = Arc::new(HostHandler::new(origin, Arc::clone(&transport)));

    let inbound = transport
        .packets()
        .ok_or("inbound channel already taken")?;
    let server = Arc::clone(&handler);
    tokio::spawn(async move {
        server.serve_inbound(inbound).await;
    });

    let runner = Arc::clone(&transport);
    tokio::spawn(async move {
        if let Err(err) = runner.start().await {
            log::error!("accept loop terminated: {}", err);
        }
    });

    // Bootstrap from PULSENET_SEEDS=host:port,host:port. Seed ids are
    // unknown before first contact; a ping response teaches us the real id.
    if let Ok(seeds) = std::env::var("PULSENET_SEEDS") {
        for seed in seeds.split(',').filter(|s| !s.is_empty()) {
            match seed.trim().parse() {
                Ok(addr) => {
                    let peer = Host::new(HostId::zero(), addr);
                    match handler.ping(&peer).await {
                        Ok(()) => log::info!("🌱 seed {} is alive", addr),
                        Err(err) => log::warn!("seed {} unreachable: {}", addr, err),
                    }
                }
                Err(err) => log::warn!("bad seed address {:?}: {}", seed, err),
            }
        }
    }

    let mut stopped = transport.stopped();
    let mut status = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = status.tick() => {
                log::info!(
                    "📊 peers={} pending_requests={}",
                    handler.table().len(),
                    transport.pending_requests()
                );
            }
            _ = stopped.changed() => {
                if *stopped.borrow() {
                    log::info!("transport stopped, shutting down");
                    break;
                }
            }
        }
    }
    Ok(())
}
