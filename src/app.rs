use crate::backend::{ChatBackend, HttpBackend};
use crate::catalog;
use crate::cli::{ChatsCommand, ProfilesCommand};
use crate::config::Config;
use crate::model::{ChatDraft, ChatId, ProfileDraft, ProviderKind};
use crate::sanitize::sanitize;
use crate::session::SessionContext;
use crate::transcript::{Reconciled, Submitted, TranscriptAssembler, TranscriptUpdate};
use anyhow::Context;
use std::io::Write;
use std::sync::Arc;

pub async fn cmd_profiles(backend: &HttpBackend, cmd: ProfilesCommand) -> anyhow::Result<()> {
    match cmd {
        ProfilesCommand::List => {
            let profiles = backend.list_profiles().await.context("failed to list profiles")?;
            for p in profiles {
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    p.id, p.name, p.provider, p.model_name, p.url, p.token_size
                );
            }
        }
        ProfilesCommand::Add {
            name,
            provider,
            url,
            model_name,
            token_size,
        } => {
            let provider = ProviderKind::from(provider);
            let url = resolve_url(&provider, url)?;
            let draft = ProfileDraft {
                name,
                provider,
                url,
                model_name,
                token_size: token_size.unwrap_or(catalog::DEFAULT_TOKEN_SIZE),
            };
            let p = backend
                .create_profile(&draft)
                .await
                .context("failed to create profile")?;
            println!("created profile {} ({})", p.id, p.name);
        }
        ProfilesCommand::Update {
            id,
            name,
            provider,
            url,
            model_name,
            token_size,
        } => {
            let current = backend
                .list_profiles()
                .await
                .context("failed to list profiles")?
                .into_iter()
                .find(|p| p.id == id)
                .with_context(|| format!("no profile with id {id}"))?;

            let draft = ProfileDraft {
                name: name.unwrap_or(current.name),
                provider: provider.map(ProviderKind::from).unwrap_or(current.provider),
                url: url.unwrap_or(current.url),
                model_name: model_name.unwrap_or(current.model_name),
                token_size: token_size.unwrap_or(current.token_size),
            };
            backend
                .update_profile(id, &draft)
                .await
                .with_context(|| format!("failed to update profile {id}"))?;
            println!("updated profile {id}");
        }
        ProfilesCommand::Remove { id } => {
            backend
                .delete_profile(id)
                .await
                .with_context(|| format!("failed to delete profile {id}"))?;
            println!("deleted profile {id}");
        }
    }
    Ok(())
}

fn resolve_url(provider: &ProviderKind, url: Option<String>) -> anyhow::Result<String> {
    match url.or_else(|| catalog::default_url(provider).map(str::to_string)) {
        Some(url) => Ok(url),
        None => anyhow::bail!("provider `{provider}` has no default endpoint; pass --url"),
    }
}

pub async fn cmd_chats(backend: &HttpBackend, cmd: ChatsCommand) -> anyhow::Result<()> {
    match cmd {
        ChatsCommand::List => {
            let chats = backend.list_chats().await.context("failed to list chats")?;
            for c in chats {
                println!(
                    "{}\t{}\tprofile {}\t{}",
                    c.id,
                    c.title,
                    c.profile_id,
                    c.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        ChatsCommand::New { profile_id, title } => {
            let chat = backend
                .create_chat(&ChatDraft { title, profile_id })
                .await
                .context("failed to create chat")?;
            println!("created chat {} ({})", chat.id, chat.title);
        }
        ChatsCommand::Show { id } => {
            let id = ChatId(id);
            let chat = backend
                .get_chat(id)
                .await
                .with_context(|| format!("failed to load chat {id}"))?;
            let messages = backend
                .list_messages(id)
                .await
                .with_context(|| format!("failed to load messages of chat {id}"))?;

            println!("# {}\n", chat.title);
            for m in messages {
                println!("{} ({}):", m.role.as_str(), m.created_at.format("%Y-%m-%d %H:%M"));
                println!("{}\n", sanitize(&m.content));
            }
        }
        ChatsCommand::Delete { id } => {
            let id = ChatId(id);
            backend
                .delete_chat(id)
                .await
                .with_context(|| format!("failed to delete chat {id}"))?;
            println!("deleted chat {id}");
        }
    }
    Ok(())
}

pub async fn cmd_models(backend: &HttpBackend, base_url: Option<&str>) -> anyhow::Result<()> {
    for m in backend.list_models(base_url).await {
        match m.parameter_size() {
            Some(size) => println!("{}\t{}", m.name, size),
            None => println!("{}", m.name),
        }
    }
    Ok(())
}

/// Load `chat_id` with its messages and profile into a fresh transcript.
pub async fn open_transcript(
    backend: &Arc<HttpBackend>,
    cfg: &Config,
    streaming: bool,
    chat_id: ChatId,
) -> anyhow::Result<TranscriptAssembler> {
    let mut chat = backend
        .get_chat(chat_id)
        .await
        .with_context(|| format!("failed to load chat {chat_id}"))?;
    chat.messages = backend
        .list_messages(chat_id)
        .await
        .with_context(|| format!("failed to load messages of chat {chat_id}"))?;

    let profiles = backend.list_profiles().await.context("failed to list profiles")?;
    let profile = profiles.iter().find(|p| p.id == chat.profile_id);

    let mut transcript = TranscriptAssembler::new(
        Arc::clone(backend) as Arc<dyn ChatBackend>,
        SessionContext::new(streaming),
        cfg.reconcile,
    );
    transcript.open_chat(chat, profile);
    Ok(transcript)
}

pub async fn cmd_send(
    backend: &Arc<HttpBackend>,
    cfg: &Config,
    streaming: bool,
    chat_id: ChatId,
    prompt: &str,
) -> anyhow::Result<()> {
    let mut transcript = open_transcript(backend, cfg, streaming, chat_id).await?;
    let mut out = std::io::stdout();

    let submitted = transcript
        .submit(chat_id, prompt)
        .await
        .with_context(|| format!("failed to send message to chat {chat_id}"))?;

    match submitted {
        Submitted::Completed(message) => {
            writeln!(out, "{}", sanitize(&message.content))?;
        }
        Submitted::Streaming => {
            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            let last = loop {
                tokio::select! {
                    res = &mut ctrl_c => {
                        res.context("failed to listen for Ctrl-C")?;
                        break transcript.cancel(chat_id).await;
                    }
                    update = transcript.next_update(chat_id) => match update {
                        Some(TranscriptUpdate::Fragment(text)) => {
                            write!(out, "{text}")?;
                            out.flush().ok();
                        }
                        other => break other,
                    },
                }
            };
            writeln!(out)?;

            match last {
                Some(TranscriptUpdate::Cancelled { content }) => {
                    eprintln!("(cancelled; kept {} characters)", content.chars().count());
                }
                Some(TranscriptUpdate::Failed(error)) => {
                    transcript.settle(chat_id).await;
                    return Err(anyhow::Error::new(error).context("response stream failed"));
                }
                _ => {}
            }
        }
    }

    if transcript.settle(chat_id).await == Reconciled::Kept {
        tracing::debug!(%chat_id, "reply not yet visible on the server");
    }
    Ok(())
}
