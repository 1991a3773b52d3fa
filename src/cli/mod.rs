pub mod commands;

use clap::{ Parser, Subcommand };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Backend origin. Buffered calls go to `<url>/api`, streaming to `<url>/api/chat/stream`.
    #[arg(long, env = "MEMCHAT_SERVER_URL", default_value = "http://127.0.0.1:8080", global = true)]
    pub server_url: String,

    /// Timeout in milliseconds for buffered (non-streaming) requests.
    #[arg(long, env = "MEMCHAT_TIMEOUT_MS", default_value = "30000", global = true)]
    pub timeout_ms: u64,

    /// Enable debug logging/output
    #[arg(long, env = "MEMCHAT_DEBUG", default_value = "false", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List the conversations the backend keeps for this client address.
    List,

    /// Create a conversation and print its memory id.
    New,

    /// Print the messages of a conversation, oldest first.
    Messages {
        memory_id: String,
    },

    /// Generate a conversation title from its first message.
    Title {
        memory_id: String,
        message: String,
    },

    /// Send one message and stream the reply to stdout.
    Send {
        memory_id: String,
        message: String,
    },

    /// Interactive chat. Creates a conversation unless one is given.
    Chat {
        #[arg(long)]
        memory_id: Option<String>,
    },
}
