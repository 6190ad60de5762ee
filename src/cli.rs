use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::assistant::gemini::{DEFAULT_ENDPOINT, DEFAULT_MODEL};

#[derive(Parser)]
#[command(name = "livechatd", about = "Campus guide backend with live agent chat")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP and live-chat WebSocket service
    Serve {
        /// Address to listen on
        #[arg(long, env = "LIVECHAT_BIND", default_value = "127.0.0.1:8000")]
        bind: SocketAddr,

        /// SQLite database holding the campus records
        #[arg(long, env = "LIVECHAT_DB", default_value = "campus.db")]
        db: PathBuf,

        /// Gemini API key; without it the assistant only gives fallback replies
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
        gemini_api_key: Option<String>,

        /// Gemini model name
        #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_MODEL)]
        gemini_model: String,

        /// Gemini API base URL
        #[arg(long, env = "GEMINI_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
        gemini_endpoint: String,
    },

    /// Create the schema and load the sample campus records
    Seed {
        /// SQLite database to seed
        #[arg(long, env = "LIVECHAT_DB", default_value = "campus.db")]
        db: PathBuf,
    },
}
