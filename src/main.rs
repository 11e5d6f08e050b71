mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use std::sync::Arc;
use talentbox::config::Config;
use talentbox::store::MetadataStore;
use talentbox::webhook::{HttpTransport, WebhookEmitter};
use talentbox::{api, observability::Metrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "talentbox=info,warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            let mut config = Config::load()?;
            if let Some(address) = args.address {
                config.server.bind_addr = address;
            }
            api::run(config).await?;
        }
        Commands::ReplayWebhooks => {
            let config = Config::load()?;
            let store = MetadataStore::open(config.server.metadata_path())?;
            let transport = Arc::new(HttpTransport::new(config.webhook.timeout.as_duration())?);
            let emitter = WebhookEmitter::new(
                transport,
                config.webhook.url.clone(),
                config.webhook.secret.clone(),
                config.webhook.max_attempts,
                store,
                Arc::new(Metrics::new()),
            );
            let replayed = emitter.replay_failures().await;
            println!("replayed {replayed} webhook deliveries");
        }
        Commands::PurgeWebhookFailures => {
            let config = Config::load()?;
            let store = MetadataStore::open(config.server.metadata_path())?;
            let purged = store.purge_webhook_failures()?;
            println!("purged {purged} webhook failures");
        }
    }

    Ok(())
}
