#![cfg(feature = "tui")]

use crate::app;
use crate::backend::HttpBackend;
use crate::config::Config;
use crate::error::ChatError;
use crate::model::{ChatId, Role};
use crate::sanitize::sanitize;
use crate::transcript::{Entry, EntryState, Submitted, TranscriptAssembler, TranscriptUpdate};
use anyhow::Context;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

struct UiState {
    chat_id: ChatId,
    input: String,
    status: String,
    last_prompt: Option<String>,
}

pub async fn run_tui(
    backend: &Arc<HttpBackend>,
    cfg: &Config,
    streaming: bool,
    chat_id: ChatId,
) -> anyhow::Result<()> {
    let mut transcript = app::open_transcript(backend, cfg, streaming, chat_id).await?;

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;

    let term_backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(term_backend).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        while let Ok(ev) = crossterm::event::read() {
            if ev_tx.send(ev).is_err() {
                break;
            }
        }
    });

    let mut ui = UiState {
        chat_id,
        input: String::new(),
        status: "Enter sends, Esc cancels, Ctrl-R retries, Ctrl-C quits. /stream on|off, /refresh".to_string(),
        last_prompt: None,
    };

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(33));

    let res = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = draw(&mut terminal, &transcript, &ui) {
                    break Err(e);
                }
            }
            Some(ev) = ev_rx.recv() => {
                if let Event::Key(key) = ev {
                    match handle_key(key, &mut ui, &mut transcript).await {
                        Ok(true) => break Ok(()),
                        Ok(false) => {}
                        Err(e) => break Err(e),
                    }
                }
            }
            Some(update) = transcript.next_update(chat_id), if transcript.is_streaming(chat_id) => {
                apply_update(&mut ui, update);
            }
        }
    };

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

fn apply_update(ui: &mut UiState, update: TranscriptUpdate) {
    match update {
        TranscriptUpdate::Fragment(_) => {}
        TranscriptUpdate::Completed { .. } => ui.status.clear(),
        TranscriptUpdate::Cancelled { content } => {
            ui.status = if content.is_empty() {
                "cancelled".to_string()
            } else {
                "cancelled; partial answer kept".to_string()
            };
        }
        TranscriptUpdate::Failed(e) => ui.status = describe(&e),
    }
}

fn describe(e: &ChatError) -> String {
    match e {
        ChatError::ModelApi(_) => format!("{e}; check the profile's model and endpoint"),
        _ if e.is_retryable() => format!("{e}; Ctrl-R to retry"),
        _ => e.to_string(),
    }
}

async fn handle_key(
    key: KeyEvent,
    ui: &mut UiState,
    transcript: &mut TranscriptAssembler,
) -> anyhow::Result<bool> {
    let chat_id = ui.chat_id;

    if key.modifiers.contains(KeyModifiers::CONTROL) {
        match key.code {
            KeyCode::Char('c') => return Ok(true),
            KeyCode::Char('r') => {
                if let Some(prompt) = ui.last_prompt.clone() {
                    submit(ui, transcript, prompt).await;
                }
                return Ok(false);
            }
            _ => {}
        }
    }

    match key.code {
        KeyCode::Esc => {
            if !transcript.is_streaming(chat_id) {
                return Ok(true);
            }
            if let Some(update) = transcript.cancel(chat_id).await {
                apply_update(ui, update);
            }
        }
        KeyCode::Char(c) => ui.input.push(c),
        KeyCode::Backspace => {
            ui.input.pop();
        }
        KeyCode::Enter => {
            let msg = ui.input.trim().to_string();
            ui.input.clear();
            if msg.is_empty() {
                return Ok(false);
            }

            match msg.as_str() {
                "/quit" => return Ok(true),
                "/stream on" | "/stream off" => {
                    let on = msg.ends_with("on");
                    transcript.session_mut().set_streaming(on);
                    ui.status = format!("streaming {}", if on { "on" } else { "off" });
                }
                "/refresh" => {
                    ui.status = match transcript.refresh(chat_id).await {
                        Ok(outcome) => format!("refresh: {outcome:?}"),
                        Err(e) => describe(&e),
                    };
                }
                _ => submit(ui, transcript, msg).await,
            }
        }
        _ => {}
    }

    Ok(false)
}

async fn submit(ui: &mut UiState, transcript: &mut TranscriptAssembler, prompt: String) {
    if transcript.is_streaming(ui.chat_id) {
        ui.status = "a reply is still streaming; Esc to cancel".to_string();
        return;
    }
    let res = transcript.submit(ui.chat_id, &prompt).await;
    ui.last_prompt = Some(prompt);
    ui.status = match res {
        Ok(Submitted::Streaming) => "streaming... (Esc to cancel)".to_string(),
        Ok(Submitted::Completed(_)) => String::new(),
        Err(e) => describe(&e),
    };
}

fn entry_label(e: &Entry) -> String {
    let role = match e.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    match e.state {
        EntryState::Persisted => format!("{role}:"),
        EntryState::Optimistic => format!("{role} (sending):"),
        EntryState::Provisional => format!("{role} (typing):"),
        EntryState::Committed => format!("{role} (saving):"),
    }
}

fn draw(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    transcript: &TranscriptAssembler,
    ui: &UiState,
) -> anyhow::Result<()> {
    let entries = transcript.entries(ui.chat_id);
    let streaming = if transcript.session().streaming() { "on" } else { "off" };

    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3), Constraint::Length(1)])
            .split(f.area());

        let mut text = Text::default();
        for e in &entries {
            let style = match (e.role, e.state) {
                (_, EntryState::Optimistic | EntryState::Provisional) => {
                    Style::default().add_modifier(Modifier::DIM)
                }
                (Role::User, _) => Style::default().add_modifier(Modifier::BOLD),
                (Role::Assistant, _) => Style::default(),
            };
            text.lines.push(Line::styled(entry_label(e), style));
            let body = match e.role {
                Role::Assistant => sanitize(&e.content),
                Role::User => e.content.clone(),
            };
            text.lines.extend(Text::from(body).lines);
            text.lines.push(Line::from(""));
        }

        // Keep the newest lines in view.
        let height = chunks[0].height.saturating_sub(2) as usize;
        let scroll = text.lines.len().saturating_sub(height) as u16;

        let chat = Paragraph::new(text)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("localchat | chat {} | streaming {streaming}", ui.chat_id)),
            )
            .wrap(Wrap { trim: false })
            .scroll((scroll, 0));

        let input_w = Paragraph::new(ui.input.as_str())
            .block(Block::default().borders(Borders::ALL).title("input"));
        let status_w = Paragraph::new(ui.status.as_str()).style(Style::default().add_modifier(Modifier::DIM));

        f.render_widget(chat, chunks[0]);
        f.render_widget(input_w, chunks[1]);
        f.render_widget(status_w, chunks[2]);

        let x = chunks[1].x + 1 + ui.input.chars().count() as u16;
        let y = chunks[1].y + 1;
        f.set_cursor_position((x.min(chunks[1].x + chunks[1].width.saturating_sub(2)), y));
    })?;
    Ok(())
}
