//! Command-line interface definition for chatstream
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for interactive chat, one-shot messages, and
//! thread history management.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// chatstream - streaming terminal chat client
///
/// Talk to a remote chat service, watch replies stream in, and keep a
/// local history of threads.
#[derive(Parser, Debug, Clone)]
#[command(name = "chatstream")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Override the chat service base URL
    #[arg(long, env = "CHATSTREAM_SERVER")]
    pub server: Option<String>,

    /// Override the history database path
    #[arg(long = "storage-path", env = "CHATSTREAM_STORAGE_PATH")]
    pub storage_path: Option<String>,

    /// Keep threads in memory only
    #[arg(long)]
    pub ephemeral: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for chatstream
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Resume an existing thread (id or unique prefix)
        #[arg(short, long)]
        thread: Option<String>,
    },

    /// Send a single message and print the streamed reply
    Send {
        /// Message text
        prompt: Option<String>,

        /// Continue an existing thread (id or unique prefix)
        #[arg(short, long)]
        thread: Option<String>,

        /// Attach an image file
        #[arg(short, long)]
        image: Option<PathBuf>,
    },

    /// Edit a message and regenerate the reply that follows it
    Edit {
        /// Thread id or unique prefix
        thread: String,

        /// Message id within the thread
        message: u64,

        /// Replacement text
        content: String,
    },

    /// Manage stored threads
    Threads {
        /// Thread management subcommand
        #[command(subcommand)]
        command: ThreadCommand,
    },
}

/// Thread management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ThreadCommand {
    /// List stored threads, most recent first
    List {
        /// Print thread summaries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a thread's messages
    Show {
        /// Thread id or unique prefix
        id: String,
    },

    /// Delete a thread and its messages
    Delete {
        /// Thread id or unique prefix
        id: String,
    },

    /// Export a thread as a Markdown transcript
    Export {
        /// Thread id or unique prefix
        id: String,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the public share link for a thread
    Share {
        /// Thread id or unique prefix
        id: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            json_logs: false,
            server: None,
            storage_path: None,
            ephemeral: false,
            command: Commands::Threads {
                command: ThreadCommand::List { json: false },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default() {
        let cli = Cli::default();
        assert_eq!(cli.config, Some("config/config.yaml".to_string()));
        assert!(!cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Threads {
                command: ThreadCommand::List { json: false }
            }
        ));
    }

    #[test]
    fn test_cli_parse_chat_command() {
        let cli = Cli::try_parse_from(["chatstream", "chat"]).unwrap();
        assert!(matches!(cli.command, Commands::Chat { thread: None }));
    }

    #[test]
    fn test_cli_parse_chat_resume() {
        let cli = Cli::try_parse_from(["chatstream", "chat", "--thread", "abcdef12"]).unwrap();
        if let Commands::Chat { thread } = cli.command {
            assert_eq!(thread.as_deref(), Some("abcdef12"));
        } else {
            panic!("Expected Chat command");
        }
    }

    #[test]
    fn test_cli_parse_send_with_image() {
        let cli = Cli::try_parse_from(["chatstream", "send", "describe this", "--image", "cat.png"])
            .unwrap();
        if let Commands::Send {
            prompt,
            thread,
            image,
        } = cli.command
        {
            assert_eq!(prompt.as_deref(), Some("describe this"));
            assert!(thread.is_none());
            assert_eq!(image, Some(PathBuf::from("cat.png")));
        } else {
            panic!("Expected Send command");
        }
    }

    #[test]
    fn test_cli_parse_edit() {
        let cli = Cli::try_parse_from(["chatstream", "edit", "abcdef12", "3", "new text"]).unwrap();
        if let Commands::Edit {
            thread,
            message,
            content,
        } = cli.command
        {
            assert_eq!(thread, "abcdef12");
            assert_eq!(message, 3);
            assert_eq!(content, "new text");
        } else {
            panic!("Expected Edit command");
        }
    }

    #[test]
    fn test_cli_parse_threads_list_json() {
        let cli = Cli::try_parse_from(["chatstream", "threads", "list", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Threads {
                command: ThreadCommand::List { json: true }
            }
        ));
    }

    #[test]
    fn test_cli_parse_threads_export() {
        let cli = Cli::try_parse_from([
            "chatstream",
            "threads",
            "export",
            "abcdef12",
            "--output",
            "out.md",
        ])
        .unwrap();
        if let Commands::Threads {
            command: ThreadCommand::Export { id, output },
        } = cli.command
        {
            assert_eq!(id, "abcdef12");
            assert_eq!(output, Some(PathBuf::from("out.md")));
        } else {
            panic!("Expected threads export");
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from([
            "chatstream",
            "--verbose",
            "--ephemeral",
            "--server",
            "http://localhost:9000/api",
            "threads",
            "list",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(cli.ephemeral);
        assert_eq!(cli.server.as_deref(), Some("http://localhost:9000/api"));
    }

    #[test]
    fn test_cli_rejects_non_numeric_message_id() {
        assert!(Cli::try_parse_from(["chatstream", "edit", "abc", "x", "text"]).is_err());
    }
}
