/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes the following command modules:

- `chat`: Interactive chat mode
- `send`: Send one message and print the streamed reply
- `edit`: Edit a message and regenerate the reply after it
- `threads`: List, show, delete, export and share stored threads

Every handler builds a [`ChatSession`] over the configured store and the
HTTP backend, and renders session updates through [`TerminalObserver`].
*/

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use colored::Colorize;

use crate::client::HttpBackend;
use crate::config::Config;
use crate::error::Result;
use crate::model::{Message, Role, ThreadId};
use crate::session::{
    ChatObserver, ChatSession, Notice, NoticeLevel, SessionPhase, SessionSettings, SubmitOutcome,
};
use crate::storage::{ChatStore, MemoryStore, SqliteStore};

// Special commands parser for the interactive loop
pub mod special_commands;

// Thread history commands
pub mod threads;

/// Open the thread store selected by configuration
///
/// `ephemeral` keeps everything in memory for the lifetime of the process.
pub fn open_store(config: &Config, ephemeral: bool) -> Result<Arc<dyn ChatStore>> {
    if ephemeral {
        tracing::info!("Using in-memory thread store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = match &config.storage.db_path {
        Some(path) => SqliteStore::new_with_path(path.clone())?,
        None => SqliteStore::new()?,
    };
    tracing::debug!("Using thread store at {}", store.db_path().display());
    Ok(Arc::new(store))
}

/// Build a session over the configured store and chat service, with its
/// thread list loaded
pub async fn build_session(
    config: &Config,
    ephemeral: bool,
    observer: Arc<dyn ChatObserver>,
) -> Result<ChatSession> {
    let store = open_store(config, ephemeral)?;
    let backend = Arc::new(HttpBackend::new(&config.server)?);
    let session = ChatSession::new(store, backend, observer, SessionSettings::from(config));
    session.load_threads().await?;
    Ok(session)
}

/// Observer that streams live text to stdout and notices to stderr
///
/// Live text arrives as the whole buffer; only the part not yet printed is
/// written. The text shown for a reply is kept until the next submission so
/// [`finish`](Self::finish) can complete it from the sealed message.
#[derive(Debug, Default)]
pub struct TerminalObserver {
    shown: Mutex<HashMap<ThreadId, String>>,
}

impl TerminalObserver {
    /// Creates an observer with nothing shown
    pub fn new() -> Self {
        Self::default()
    }

    /// Print whatever part of the sealed reply has not been shown yet
    pub fn finish(&self, thread_id: &ThreadId, message: &Message) {
        let shown = self
            .shown
            .lock()
            .map(|mut shown| shown.remove(thread_id).unwrap_or_default())
            .unwrap_or_default();

        let mut out = std::io::stdout().lock();
        let _ = match unshown_suffix(&shown, &message.content) {
            Some(rest) => write!(out, "{}", rest),
            None => write!(out, "\n{}", message.content),
        };
        for image in &message.images {
            let _ = write!(out, "\n{} {}", "[image]".dimmed(), image);
        }
        let _ = writeln!(out, "\n");
        let _ = out.flush();
    }

    /// Forget the text shown for a thread
    pub fn reset(&self, thread_id: &ThreadId) {
        if let Ok(mut shown) = self.shown.lock() {
            shown.remove(thread_id);
        }
    }
}

/// Part of `text` that follows what was already printed
///
/// Returns `None` when `text` no longer starts with `shown`, in which case it
/// has to be printed again from the start.
pub fn unshown_suffix<'a>(shown: &str, text: &'a str) -> Option<&'a str> {
    text.strip_prefix(shown)
}

impl ChatObserver for TerminalObserver {
    fn phase_changed(&self, thread_id: &ThreadId, phase: SessionPhase) {
        tracing::debug!(thread_id = %thread_id, phase = %phase, "Phase changed");
        if phase == SessionPhase::Submitting {
            if let Ok(mut shown) = self.shown.lock() {
                shown.insert(thread_id.clone(), String::new());
            }
        }
    }

    fn live_text(&self, thread_id: &ThreadId, text: &str) {
        // The buffer is cleared when a reply is sealed or abandoned; keep
        // what was printed so `finish` can complete it.
        if text.is_empty() {
            return;
        }
        let Ok(mut shown) = self.shown.lock() else {
            return;
        };
        let entry = shown.entry(thread_id.clone()).or_default();

        let mut out = std::io::stdout().lock();
        let _ = match unshown_suffix(entry, text) {
            Some(rest) => write!(out, "{}", rest),
            None => write!(out, "\n{}", text),
        };
        let _ = out.flush();
        *entry = text.to_string();
    }

    fn notice(&self, _thread_id: Option<&ThreadId>, notice: &Notice) {
        let line = match notice.level {
            NoticeLevel::Info => notice.message.cyan(),
            NoticeLevel::Success => notice.message.green(),
            NoticeLevel::Warning => notice.message.yellow(),
            NoticeLevel::Error => notice.message.red(),
        };
        eprintln!("\n{}", line);
    }
}

/// Print one message the way chat transcripts show it
pub fn print_message(message: &Message) {
    let author = match message.role {
        Role::User => "You".bold().cyan(),
        Role::Assistant => "Assistant".bold().green(),
    };
    println!("{} {}", format!("#{}", message.id).dimmed(), author);
    if !message.content.is_empty() {
        println!("{}", message.content);
    }
    for image in &message.images {
        println!("{} {}", "[image]".dimmed(), abbreviate_image(image));
    }
    println!();
}

fn abbreviate_image(reference: &str) -> String {
    if crate::attachment::is_data_url(reference) {
        let mime = reference
            .strip_prefix("data:")
            .and_then(|rest| rest.split(';').next())
            .unwrap_or("image");
        format!("inline {}", mime)
    } else {
        reference.to_string()
    }
}

/// Turn a terminal outcome into a command result
///
/// The failure itself was already shown as a notice.
fn outcome_result(outcome: &SubmitOutcome) -> Result<()> {
    match outcome {
        SubmitOutcome::Completed { .. } | SubmitOutcome::Edited { .. } => Ok(()),
        SubmitOutcome::Rejected(error) | SubmitOutcome::Failed { error, .. } => {
            Err(anyhow::anyhow!("{}", error))
        }
        SubmitOutcome::Cancelled => Err(anyhow::anyhow!("Request cancelled")),
    }
}

/// Run a submission or edit, cancelling it on Ctrl-C
async fn run_cancellable<F>(
    session: &ChatSession,
    thread_id: &ThreadId,
    request: F,
) -> Result<SubmitOutcome>
where
    F: std::future::Future<Output = SubmitOutcome> + Send + 'static,
{
    let mut handle = tokio::spawn(request);
    tokio::select! {
        joined = &mut handle => Ok(joined?),
        _ = tokio::signal::ctrl_c() => {
            // The thread may have been saved under a new id by now.
            let target = session.selected().await.unwrap_or_else(|| thread_id.clone());
            session.cancel(&target).await;
            Ok(handle.await?)
        }
    }
}

/// Show a finished outcome on the terminal
fn render_outcome(observer: &TerminalObserver, outcome: &SubmitOutcome) {
    match outcome {
        SubmitOutcome::Completed { thread_id, message } => observer.finish(thread_id, message),
        SubmitOutcome::Edited { thread_id } | SubmitOutcome::Failed { thread_id, .. } => {
            observer.reset(thread_id)
        }
        SubmitOutcome::Rejected(_) | SubmitOutcome::Cancelled => {}
    }
}

// Chat command handler
pub mod chat {
    //! Interactive chat mode handler.
    //!
    //! Builds a session, then runs a readline loop that sends regular input
    //! as messages and dispatches `/` commands to thread management.

    use super::*;
    use crate::attachment::load_image;
    use crate::commands::special_commands::{parse_special_command, print_help, SpecialCommand};
    use crate::session::Submission;
    use crate::transcript::share_link;
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;
    use std::path::PathBuf;

    /// Start interactive chat mode
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration (consumed)
    /// * `thread` - Optional thread id or prefix to resume
    /// * `ephemeral` - Keep threads in memory only
    pub async fn run_chat(config: Config, thread: Option<String>, ephemeral: bool) -> Result<()> {
        tracing::info!("Starting interactive chat mode");

        let observer = Arc::new(TerminalObserver::new());
        let session = build_session(&config, ephemeral, observer.clone()).await?;

        let mut current = match thread {
            Some(id) => {
                let thread = session.select_thread(&id).await?;
                for message in &thread.messages {
                    print_message(message);
                }
                thread.id
            }
            None => session.new_chat().await,
        };

        let mut rl = DefaultEditor::new()?;
        let mut pending_image: Option<String> = None;

        print_welcome_banner(&config);

        loop {
            let prompt = format_prompt(&session, &current, pending_image.is_some()).await;
            match rl.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(trimmed)?;

                    let command = match parse_special_command(trimmed) {
                        Ok(command) => command,
                        Err(e) => {
                            eprintln!("{}", e.to_string().red());
                            continue;
                        }
                    };

                    match command {
                        SpecialCommand::None => {
                            let mut submission = Submission::text(trimmed);
                            if let Some(image) = pending_image.take() {
                                submission = submission.with_image(image);
                            }
                            let task = {
                                let session = session.clone();
                                let id = current.clone();
                                async move { session.submit(&id, submission).await }
                            };
                            let outcome = run_cancellable(&session, &current, task).await?;
                            render_outcome(&observer, &outcome);
                            if let Some(id) = outcome.thread_id() {
                                current = id.clone();
                            } else if let Some(selected) = session.selected().await {
                                current = selected;
                            }
                        }
                        SpecialCommand::NewChat => {
                            current = session.new_chat().await;
                            pending_image = None;
                            println!("{}", "Started a new chat.".green());
                        }
                        SpecialCommand::ListThreads => {
                            threads::print_thread_table(&session.threads().await);
                        }
                        SpecialCommand::OpenThread(id) => match session.select_thread(&id).await {
                            Ok(thread) => {
                                println!();
                                for message in &thread.messages {
                                    print_message(message);
                                }
                                current = thread.id;
                            }
                            Err(e) => eprintln!("{}", format!("{:#}", e).red()),
                        },
                        SpecialCommand::DeleteThread(target) => {
                            let target = match target {
                                Some(id) => match session.select_thread(&id).await {
                                    Ok(thread) => thread.id,
                                    Err(e) => {
                                        eprintln!("{}", format!("{:#}", e).red());
                                        continue;
                                    }
                                },
                                None => current.clone(),
                            };
                            match session.delete_thread(&target).await {
                                Ok(()) => println!("{}", format!("Deleted thread {}", target).green()),
                                Err(e) => eprintln!("{}", format!("{:#}", e).red()),
                            }
                            current = match session.selected().await {
                                Some(id) if id != target => id,
                                _ => session.new_chat().await,
                            };
                        }
                        SpecialCommand::EditMessage {
                            message_id,
                            content,
                        } => {
                            let task = {
                                let session = session.clone();
                                let id = current.clone();
                                async move { session.edit_message(&id, message_id, &content).await }
                            };
                            let outcome = run_cancellable(&session, &current, task).await?;
                            render_outcome(&observer, &outcome);
                        }
                        SpecialCommand::DeleteMessage(message_id) => {
                            match session.delete_message(&current, message_id).await {
                                Ok(_) => println!(
                                    "{}",
                                    format!("Removed message #{}", message_id).green()
                                ),
                                Err(e) => eprintln!("{}", format!("{:#}", e).red()),
                            }
                        }
                        SpecialCommand::AttachImage(path) => {
                            let path = expand_home(&path);
                            match load_image(&path, config.attachments.max_image_bytes).await {
                                Ok(image) => {
                                    println!(
                                        "{}",
                                        format!(
                                            "Attached {} ({}x{}, {} bytes) to your next message",
                                            image.mime_type, image.width, image.height, image.size
                                        )
                                        .green()
                                    );
                                    pending_image = Some(image.data_url);
                                }
                                Err(e) => eprintln!("{}", format!("{:#}", e).red()),
                            }
                        }
                        SpecialCommand::ShowThread => match session.thread(&current).await {
                            Some(thread) if !thread.messages.is_empty() => {
                                for message in &thread.messages {
                                    print_message(message);
                                }
                            }
                            _ => println!("{}", "No messages yet.".yellow()),
                        },
                        SpecialCommand::Share => {
                            match share_link(&config.share.public_base_url, &current) {
                                Ok(link) => println!("{}", link.cyan()),
                                Err(e) => eprintln!("{}", format!("{:#}", e).red()),
                            }
                        }
                        SpecialCommand::Help => print_help(),
                        SpecialCommand::Exit => break,
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => break,
                Err(e) => {
                    tracing::error!("Readline error: {}", e);
                    return Err(e.into());
                }
            }
        }

        println!("Goodbye!");
        Ok(())
    }

    fn print_welcome_banner(config: &Config) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║            chatstream Interactive Chat - Welcome!            ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");
        println!("Server: {}", config.server.base_url.cyan());
        println!("Type '/help' for available commands, 'exit' to quit\n");
    }

    async fn format_prompt(session: &ChatSession, current: &ThreadId, has_image: bool) -> String {
        let label = match session.thread(current).await {
            Some(thread) if !thread.title.is_empty() => thread.title,
            _ => "new chat".to_string(),
        };
        let image = if has_image { " +image" } else { "" };
        format!("{}{}{} ", format!("[{}]", label).cyan(), image.yellow(), " >>".bold())
    }

    fn expand_home(path: &str) -> PathBuf {
        match path.strip_prefix("~/") {
            Some(rest) => directories::BaseDirs::new()
                .map(|dirs| dirs.home_dir().join(rest))
                .unwrap_or_else(|| PathBuf::from(path)),
            None => PathBuf::from(path),
        }
    }
}

// One-shot message handler
pub mod send {
    //! Send a single message and print the streamed reply.

    use super::*;
    use crate::attachment::load_image;
    use crate::session::Submission;
    use std::io::Read;
    use std::path::PathBuf;

    /// Send one message, optionally continuing a thread
    ///
    /// Reads the message from stdin when `prompt` is not given.
    pub async fn run_send(
        config: Config,
        prompt: Option<String>,
        thread: Option<String>,
        image: Option<PathBuf>,
        ephemeral: bool,
    ) -> Result<()> {
        let text = match prompt {
            Some(text) => text,
            None => {
                let mut text = String::new();
                std::io::stdin().read_to_string(&mut text)?;
                text
            }
        };

        let mut submission = Submission::text(text);
        if let Some(path) = image {
            let attachment = load_image(&path, config.attachments.max_image_bytes).await?;
            submission = submission.with_image(attachment.data_url);
        }

        let observer = Arc::new(TerminalObserver::new());
        let session = build_session(&config, ephemeral, observer.clone()).await?;
        let thread_id = match thread {
            Some(id) => session.select_thread(&id).await?.id,
            None => session.new_chat().await,
        };

        let task = {
            let session = session.clone();
            let id = thread_id.clone();
            async move { session.submit(&id, submission).await }
        };
        let outcome = run_cancellable(&session, &thread_id, task).await?;
        render_outcome(&observer, &outcome);
        if let Some(id) = outcome.thread_id() {
            tracing::info!(thread_id = %id, "Message sent");
        }
        outcome_result(&outcome)
    }
}

// Message edit handler
pub mod edit {
    //! Edit a stored message and regenerate the reply after it.

    use super::*;

    /// Replace a message's text and stream the regenerated reply
    pub async fn run_edit(
        config: Config,
        thread: String,
        message_id: u64,
        content: String,
        ephemeral: bool,
    ) -> Result<()> {
        let observer = Arc::new(TerminalObserver::new());
        let session = build_session(&config, ephemeral, observer.clone()).await?;
        let thread_id = session.select_thread(&thread).await?.id;

        let task = {
            let session = session.clone();
            let id = thread_id.clone();
            async move { session.edit_message(&id, message_id, &content).await }
        };
        let outcome = run_cancellable(&session, &thread_id, task).await?;
        render_outcome(&observer, &outcome);
        outcome_result(&outcome)
    }
}
