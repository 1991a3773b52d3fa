pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod store;

use cli::Args;
use config::ClientConfig;
use log::info;
use std::error::Error;
use store::ChatStore;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = ClientConfig::from_args(&args)?;

    info!("--- Client Configuration ---");
    info!("Server URL: {}", config.server_url);
    info!("API Base: {}", config.api_base());
    info!("Stream URL: {}", config.stream_url());
    info!("Request Timeout: {} ms", config.timeout.as_millis());
    info!("----------------------------");

    let store = ChatStore::from_config(&config)?;
    cli::commands::execute(&store, args.command).await
}
