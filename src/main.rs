mod assistant;
mod broker;
mod cli;
mod ipc;
mod server;
mod store;

use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

use assistant::gemini::GeminiConfig;
use server::ServeConfig;
use store::SqliteStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            bind,
            db,
            gemini_api_key,
            gemini_model,
            gemini_endpoint,
        } => {
            let config = ServeConfig {
                bind,
                db_path: db,
                gemini: gemini_api_key.map(|api_key| GeminiConfig {
                    api_key,
                    model: gemini_model,
                    endpoint: gemini_endpoint,
                }),
            };
            if let Err(e) = server::serve(config).await {
                tracing::error!(error = %e, "serve failed");
                eprintln!("livechatd serve: {e}");
                std::process::exit(1);
            }
        }
        Command::Seed { db } => {
            if let Err(e) = SqliteStore::open(&db).and_then(|store| store.seed()) {
                tracing::error!(error = %e, "seed failed");
                eprintln!("livechatd seed: {e}");
                std::process::exit(1);
            }
            tracing::info!(db = %db.display(), "campus records seeded");
        }
    }
}
