use std::sync::Arc;

use chrono::Utc;
use colored::Colorize;
use prettytable::{format, Table};

use crate::cli::ThreadCommand;
use crate::commands::{build_session, print_message};
use crate::config::Config;
use crate::error::Result;
use crate::model::Thread;
use crate::session::NoopObserver;
use crate::storage::ThreadSummary;
use crate::transcript::{render_markdown, share_link, time_since};

/// Longest title shown in the thread table
const TABLE_TITLE_CHARS: usize = 40;

/// Handle thread management commands
pub async fn handle_threads(config: Config, command: ThreadCommand, ephemeral: bool) -> Result<()> {
    let session = build_session(&config, ephemeral, Arc::new(NoopObserver)).await?;

    match command {
        ThreadCommand::List { json: true } => {
            let summaries = summarize(&session.threads().await);
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        ThreadCommand::List { json: false } => {
            let threads = session.threads().await;
            print_thread_table(&threads);
            if !threads.is_empty() {
                println!(
                    "Use {} to resume a thread.",
                    "chatstream chat --thread <ID>".cyan()
                );
                println!();
            }
        }
        ThreadCommand::Show { id } => {
            let thread = session.select_thread(&id).await?;
            println!("\n{}", display_title(&thread).bold());
            println!(
                "{}\n",
                format!("{} · {}", thread.category, thread.id).dimmed()
            );
            for message in &thread.messages {
                print_message(message);
            }
        }
        ThreadCommand::Delete { id } => {
            let thread = session.select_thread(&id).await?;
            session.delete_thread(&thread.id).await?;
            println!("{}", format!("Deleted thread {}", thread.id).green());
        }
        ThreadCommand::Export { id, output } => {
            let thread = session.select_thread(&id).await?;
            let markdown = render_markdown(&thread);
            match output {
                Some(path) => {
                    tokio::fs::write(&path, markdown).await?;
                    println!(
                        "{}",
                        format!("Exported thread {} to {}", thread.id, path.display()).green()
                    );
                }
                None => print!("{}", markdown),
            }
        }
        ThreadCommand::Share { id } => {
            let thread = session.select_thread(&id).await?;
            println!("{}", share_link(&config.share.public_base_url, &thread.id)?);
        }
    }

    Ok(())
}

/// Print threads as a table, most recent first
pub fn print_thread_table(threads: &[Thread]) {
    if threads.is_empty() {
        println!("{}", "No threads found.".yellow());
        return;
    }

    let now = Utc::now();
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "ID".bold(),
        "Title".bold(),
        "Category".bold(),
        "Messages".bold(),
        "Last Updated".bold()
    ]);

    for thread in threads {
        let id_short = if thread.is_temporary() {
            "(unsaved)".to_string()
        } else {
            thread.id.as_str().chars().take(8).collect()
        };
        table.add_row(prettytable::row![
            id_short.cyan(),
            shorten(&display_title(thread), TABLE_TITLE_CHARS),
            thread.category,
            thread.messages.len(),
            time_since(thread.last_update, now)
        ]);
    }

    println!("\nThreads:");
    table.printstd();
    println!();
}

/// Listing metadata for saved threads, most recent first
pub fn summarize(threads: &[Thread]) -> Vec<ThreadSummary> {
    threads
        .iter()
        .filter(|t| !t.is_temporary())
        .map(ThreadSummary::from)
        .collect()
}

fn display_title(thread: &Thread) -> String {
    if thread.title.trim().is_empty() {
        "Untitled chat".to_string()
    } else {
        thread.title.clone()
    }
}

fn shorten(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{temp_db_path, temp_dir};

    #[test]
    fn test_shorten() {
        assert_eq!(shorten("short", 10), "short");
        assert_eq!(shorten("exactly ten", 11), "exactly ten");
        assert_eq!(shorten("naïve résumé writing", 10), "naïve r...");
    }

    #[test]
    fn test_display_title() {
        let mut thread = Thread::temporary("General");
        assert_eq!(display_title(&thread), "Untitled chat");
        thread.title = "Borrowing".into();
        assert_eq!(display_title(&thread), "Borrowing");
    }

    #[test]
    fn test_summarize_skips_unsaved_threads() {
        let mut saved = Thread::temporary("Work");
        saved.id = crate::model::ThreadId::new("abc");
        saved.title = "Saved".into();
        saved
            .messages
            .push(crate::model::Message::user(1, "hi", None));

        let summaries = summarize(&[Thread::temporary("General"), saved]);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, "abc");
        assert_eq!(summaries[0].category, "Work");
        assert_eq!(summaries[0].message_count, 1);

        let json = serde_json::to_value(&summaries).unwrap();
        assert_eq!(json[0]["title"], "Saved");
    }

    #[test]
    fn test_print_thread_table_handles_empty_and_unsaved() {
        print_thread_table(&[]);
        print_thread_table(&[Thread::temporary("General")]);
    }

    #[tokio::test]
    async fn test_export_writes_markdown() {
        let dir = temp_dir();
        let mut config = Config::default();
        config.storage.db_path = Some(temp_db_path(&dir));

        let store = crate::commands::open_store(&config, false).unwrap();
        let thread = store.create_thread("Export me", "General").await.unwrap();
        drop(store);

        let output = dir.path().join("out.md");
        handle_threads(
            config,
            ThreadCommand::Export {
                id: thread.id.to_string(),
                output: Some(output.clone()),
            },
            false,
        )
        .await
        .unwrap();

        let written = std::fs::read_to_string(output).unwrap();
        assert!(written.starts_with("# Export me\n"));
    }

    #[tokio::test]
    async fn test_delete_removes_thread_from_store() {
        let dir = temp_dir();
        let mut config = Config::default();
        config.storage.db_path = Some(temp_db_path(&dir));

        let store = crate::commands::open_store(&config, false).unwrap();
        let thread = store.create_thread("Doomed", "General").await.unwrap();

        handle_threads(
            config,
            ThreadCommand::Delete {
                id: thread.id.to_string(),
            },
            false,
        )
        .await
        .unwrap();

        assert!(store.list_threads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_show_unknown_thread_fails() {
        let dir = temp_dir();
        let mut config = Config::default();
        config.storage.db_path = Some(temp_db_path(&dir));

        let result = handle_threads(
            config,
            ThreadCommand::Show {
                id: "does-not-exist".into(),
            },
            false,
        )
        .await;
        crate::test_utils::assert_error_contains(result, "Thread not found");
    }
}
