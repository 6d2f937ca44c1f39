use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use virtufit_relay::app::App;
use virtufit_relay::models::Config;

#[derive(Debug, Parser)]
#[command(name = "virtufit-relay")]
#[command(about = "Relay try-on uploads to an upstream inference service")]
struct CliArgs {
    /// Address to listen on, overrides BIND_ADDRESS.
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Upstream try-on endpoint, overrides RELAY_UPSTREAM_URL.
    #[arg(long, value_name = "URL")]
    upstream_url: Option<String>,
}

impl CliArgs {
    fn lookup(&self, key: &str) -> Option<String> {
        let flag = match key {
            "BIND_ADDRESS" => self.bind.clone(),
            "RELAY_UPSTREAM_URL" => self.upstream_url.clone(),
            _ => None,
        };
        flag.or_else(|| std::env::var(key).ok())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "virtufit_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let args = CliArgs::parse();

    info!("Starting virtufit-relay");

    let config = match Config::from_lookup(|key| args.lookup(key)) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    match App::from_config(config).serve().await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Relay stopped with error: {}", e);
            std::process::exit(1);
        }
    }
}
