use clap::{Parser, Subcommand};

/// Terminal client for a self-hosted chat server
#[derive(Debug, Parser)]
#[command(name = "localchat")]
#[command(version)]
#[command(about = "Terminal client for a self-hosted chat server", long_about = None)]
pub struct Args {
    /// Chat server base URL (default: config/server_url or http://localhost:8000)
    #[arg(long = "server", global = true, value_name = "URL")]
    pub server: Option<String>,

    /// Ask for complete replies instead of streamed ones
    #[arg(long = "no-stream", global = true)]
    pub no_stream: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage model profiles
    Profiles {
        #[command(subcommand)]
        cmd: ProfilesCommand,
    },

    /// Manage chats
    Chats {
        #[command(subcommand)]
        cmd: ChatsCommand,
    },

    /// List models available on an Ollama server
    Models {
        /// Ollama base URL to query (default: the server's own setting)
        #[arg(long = "base-url", value_name = "URL")]
        base_url: Option<String>,
    },

    /// Send one message to a chat and print the reply
    Send {
        chat_id: i64,
        /// Message text
        #[arg(value_name = "PROMPT", required = true)]
        prompt: Vec<String>,
    },

    /// Run an interactive terminal chat UI
    #[cfg(feature = "tui")]
    Tui { chat_id: i64 },
}

#[derive(Debug, Subcommand)]
pub enum ProfilesCommand {
    /// List profiles
    List,
    /// Add a profile
    Add {
        #[arg(long)]
        name: String,
        /// ollama, openai, anthropic or any custom kind
        #[arg(long, default_value = "ollama")]
        provider: String,
        /// Endpoint URL (default depends on the provider)
        #[arg(long)]
        url: Option<String>,
        #[arg(long = "model")]
        model_name: String,
        #[arg(long = "token-size")]
        token_size: Option<u32>,
    },
    /// Change fields of an existing profile
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long = "model")]
        model_name: Option<String>,
        #[arg(long = "token-size")]
        token_size: Option<u32>,
    },
    /// Remove a profile (its chats are kept)
    Remove { id: i64 },
}

#[derive(Debug, Subcommand)]
pub enum ChatsCommand {
    /// List chats
    List,
    /// Start a chat
    New {
        /// Profile the chat talks to
        #[arg(long = "profile")]
        profile_id: i64,
        #[arg(long, default_value = "New Chat")]
        title: String,
    },
    /// Print a chat's messages
    Show { id: i64 },
    /// Delete a chat and its messages
    Delete { id: i64 },
}
