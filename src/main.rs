mod cli;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands};
use provcheck::api;
use provcheck::config::Config;
use provcheck::connector::ConnectorRegistry;
use provcheck::engine::PermissiveMxResolver;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Api(args) => {
            let mut config = Config::load()?;
            if let Some(address) = args.address {
                config.server.bind_addr = address;
            }
            if let Some(data_path) = args.data_path {
                config.server.data_path = data_path;
            }

            // Connectors are registered by the embedding deployment; the
            // bare binary runs with an empty registry and a permissive MX
            // resolver.
            let registry = ConnectorRegistry::new();
            api::run(config, registry, Arc::new(PermissiveMxResolver)).await?;
        }
    }

    Ok(())
}
