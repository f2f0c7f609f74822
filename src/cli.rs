use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "provcheck")]
#[command(about = "Provider validation orchestration service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the validation API service and worker pools
    Api(ApiArgs),
}

#[derive(clap::Args, Debug)]
pub struct ApiArgs {
    /// Address to bind the API server to (overrides configuration)
    #[arg(long)]
    pub address: Option<SocketAddr>,

    /// Path to the state store (overrides configuration)
    #[arg(long)]
    pub data_path: Option<PathBuf>,
}
