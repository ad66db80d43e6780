use clap::Parser;
use std::path::PathBuf;
use whatsapp_gateway::protocol::stub::StubConnector;
use whatsapp_gateway::{server, Config, Server};

#[derive(Parser)]
#[command(name = "whatsapp-gateway", version, about = "Multi-tenant WhatsApp session gateway")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml", env = "GATEWAY_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;
    server::init_tracing(&config.log, config.server.is_development())?;

    Server::new(config, StubConnector::new()).run().await
}
