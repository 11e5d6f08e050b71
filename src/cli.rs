use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "talentbox")]
#[command(about = "TalentBox resume ingestion and analysis core", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the API server and worker pool in one process
    Serve(ServeArgs),

    /// Re-deliver everything in the webhook failure table
    ReplayWebhooks,

    /// Drop all retained webhook failures (operator purge)
    PurgeWebhookFailures,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the API server to (overrides configuration)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}
