mod app;
mod backend;
mod catalog;
mod cli;
mod config;
mod error;
mod model;
mod paths;
mod sanitize;
mod session;
mod stream;
mod transcript;

#[cfg(feature = "tui")]
mod tui;

use anyhow::Context;
use clap::Parser;
use model::ChatId;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let config_file = paths::config_file()?;
    let cfg = config::Config::load_optional(&config_file)?.unwrap_or_default();
    tracing::debug!(?config_file, ?cfg, "resolved config");

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;

    let server_url = cfg.server_url(args.server.as_deref());
    let backend = backend::HttpBackend::new(http, &server_url, cfg.request_timeout())
        .with_context(|| format!("invalid server URL: {server_url}"))?;
    let backend = Arc::new(backend);
    let streaming = cfg.streaming(args.no_stream);

    match args.cmd {
        cli::Command::Profiles { cmd } => app::cmd_profiles(&backend, cmd).await,
        cli::Command::Chats { cmd } => app::cmd_chats(&backend, cmd).await,
        cli::Command::Models { base_url } => app::cmd_models(&backend, base_url.as_deref()).await,
        cli::Command::Send { chat_id, prompt } => {
            let prompt = prompt.join(" ");
            if prompt.trim().is_empty() {
                anyhow::bail!("No prompt provided. Try: localchat send <CHAT_ID> \"Hello\"");
            }
            app::cmd_send(&backend, &cfg, streaming, ChatId(chat_id), &prompt).await
        }
        #[cfg(feature = "tui")]
        cli::Command::Tui { chat_id } => {
            tui::run_tui(&backend, &cfg, streaming, ChatId(chat_id)).await
        }
    }
}
