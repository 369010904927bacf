//! Special commands parser for interactive chat mode
//!
//! Lines starting with `/` control the session instead of being sent to the
//! chat service. They let the user:
//! - Start, open, list and delete threads
//! - Edit an earlier message and regenerate the reply after it
//! - Remove a single message
//! - Attach an image to the next message
//! - Print or share the current thread
//!
//! Command names are case-insensitive; arguments are kept as typed.

use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command was given an unsupported argument
    #[error("Unsupported argument for {command}: {arg}\n\nType '/help' to see valid usage")]
    UnsupportedArgument { command: String, arg: String },

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Special commands that can be executed during interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Start a new, unsaved thread
    NewChat,

    /// List threads, most recent first
    ListThreads,

    /// Switch to a thread by id or unique prefix
    OpenThread(String),

    /// Delete a thread; the current one when no id is given
    DeleteThread(Option<String>),

    /// Replace a message's text and regenerate the reply that follows it
    EditMessage {
        /// Message id within the current thread
        message_id: u64,
        /// Replacement text
        content: String,
    },

    /// Remove one message from the current thread
    DeleteMessage(u64),

    /// Attach an image file to the next message
    AttachImage(String),

    /// Print the current thread
    ShowThread,

    /// Print the public share link of the current thread
    Share,

    /// Display help information
    Help,

    /// Exit the interactive session
    Exit,

    /// Not a special command
    ///
    /// The input should be sent as a regular message.
    None,
}

/// Parse a user input string into a special command
///
/// # Errors
///
/// Returns CommandError::UnknownCommand if input starts with "/" but is not a valid command.
/// Returns CommandError::UnsupportedArgument if a command receives an invalid argument.
/// Returns CommandError::MissingArgument if a command requires an argument but none was provided.
///
/// # Examples
///
/// ```
/// use chatstream::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// let cmd = parse_special_command("/open 3f2a").unwrap();
/// assert_eq!(cmd, SpecialCommand::OpenThread("3f2a".to_string()));
///
/// let cmd = parse_special_command("hello there").unwrap();
/// assert_eq!(cmd, SpecialCommand::None);
///
/// assert!(parse_special_command("/foo").is_err());
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    // If input doesn't start with "/", it's not a command (except exit/quit)
    if !trimmed.starts_with('/') {
        return Ok(match lower.as_str() {
            "exit" | "quit" => SpecialCommand::Exit,
            _ => SpecialCommand::None,
        });
    }

    let (name, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((name, rest)) => (name.to_lowercase(), rest.trim()),
        None => (lower.clone(), ""),
    };

    match name.as_str() {
        "/new" => no_argument("/new", rest, SpecialCommand::NewChat),
        "/threads" | "/list" => no_argument("/threads", rest, SpecialCommand::ListThreads),
        "/open" => {
            required(rest, "/open", "/open <thread_id>").map(SpecialCommand::OpenThread)
        }
        "/delete" => Ok(SpecialCommand::DeleteThread(
            (!rest.is_empty()).then(|| rest.to_string()),
        )),
        "/edit" => parse_edit(rest),
        "/rm" => {
            let id = required(rest, "/rm", "/rm <message_id>")?;
            parse_message_id("/rm", &id).map(SpecialCommand::DeleteMessage)
        }
        "/image" => {
            required(rest, "/image", "/image <path>").map(SpecialCommand::AttachImage)
        }
        "/show" => no_argument("/show", rest, SpecialCommand::ShowThread),
        "/share" => no_argument("/share", rest, SpecialCommand::Share),
        "/help" | "/?" => Ok(SpecialCommand::Help),
        "/exit" | "/quit" => Ok(SpecialCommand::Exit),
        _ => Err(CommandError::UnknownCommand(trimmed.to_string())),
    }
}

fn no_argument(
    command: &str,
    rest: &str,
    cmd: SpecialCommand,
) -> Result<SpecialCommand, CommandError> {
    if rest.is_empty() {
        Ok(cmd)
    } else {
        Err(CommandError::UnsupportedArgument {
            command: command.to_string(),
            arg: rest.to_string(),
        })
    }
}

fn required(rest: &str, command: &str, usage: &str) -> Result<String, CommandError> {
    if rest.is_empty() {
        Err(CommandError::MissingArgument {
            command: command.to_string(),
            usage: usage.to_string(),
        })
    } else {
        Ok(rest.to_string())
    }
}

fn parse_edit(rest: &str) -> Result<SpecialCommand, CommandError> {
    const USAGE: &str = "/edit <message_id> <new text>";

    let (id, content) = match rest.split_once(char::is_whitespace) {
        Some((id, content)) => (id, content.trim()),
        None => (rest, ""),
    };
    if id.is_empty() || content.is_empty() {
        return Err(CommandError::MissingArgument {
            command: "/edit".to_string(),
            usage: USAGE.to_string(),
        });
    }
    let message_id = parse_message_id("/edit", id)?;

    Ok(SpecialCommand::EditMessage {
        message_id,
        content: content.to_string(),
    })
}

fn parse_message_id(command: &str, id: &str) -> Result<u64, CommandError> {
    id.trim_start_matches('#')
        .parse::<u64>()
        .map_err(|_| CommandError::UnsupportedArgument {
            command: command.to_string(),
            arg: id.to_string(),
        })
}

/// Display help text for special commands
///
/// # Examples
///
/// ```
/// use chatstream::commands::special_commands::print_help;
///
/// print_help();
/// ```
pub fn print_help() {
    println!(
        r#"
Special Commands for Interactive Chat Mode
===========================================

THREADS:
  /new            - Start a new chat
  /threads        - List threads, most recent first
  /list           - Same as /threads
  /open <id>      - Switch to a thread (id or unique prefix)
  /delete [id]    - Delete a thread (defaults to the current one)
  /show           - Print the current thread
  /share          - Print the public link of the current thread

MESSAGES:
  /edit <n> <text> - Replace message #n and regenerate the reply after it
  /rm <n>          - Remove message #n (nothing is regenerated)
  /image <path>    - Attach an image to your next message

SESSION CONTROL:
  /help           - Show this help message
  /?              - Same as /help
  exit            - Exit interactive mode
  quit            - Same as exit

NOTES:
  - Command names are case-insensitive
  - Regular text (not starting with /) is sent as a message
  - Press Ctrl-C while a reply is streaming to cancel it
  - A new chat is saved when its first message is sent
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_text_is_not_a_command() {
        assert_eq!(
            parse_special_command("what is a lifetime?").unwrap(),
            SpecialCommand::None
        );
    }

    #[test]
    fn test_parse_exit_aliases() {
        for input in ["exit", "QUIT", "/exit", "/quit"] {
            assert_eq!(parse_special_command(input).unwrap(), SpecialCommand::Exit);
        }
    }

    #[test]
    fn test_parse_thread_commands() {
        assert_eq!(
            parse_special_command("/new").unwrap(),
            SpecialCommand::NewChat
        );
        assert_eq!(
            parse_special_command("/THREADS").unwrap(),
            SpecialCommand::ListThreads
        );
        assert_eq!(
            parse_special_command("/list").unwrap(),
            SpecialCommand::ListThreads
        );
        assert_eq!(
            parse_special_command("/open AbC").unwrap(),
            SpecialCommand::OpenThread("AbC".to_string())
        );
        assert_eq!(
            parse_special_command("/delete").unwrap(),
            SpecialCommand::DeleteThread(None)
        );
        assert_eq!(
            parse_special_command("/delete abc").unwrap(),
            SpecialCommand::DeleteThread(Some("abc".to_string()))
        );
    }

    #[test]
    fn test_parse_open_requires_id() {
        let err = parse_special_command("/open").unwrap_err();
        assert!(matches!(err, CommandError::MissingArgument { .. }));
    }

    #[test]
    fn test_parse_new_rejects_arguments() {
        let err = parse_special_command("/new please").unwrap_err();
        assert_eq!(
            err,
            CommandError::UnsupportedArgument {
                command: "/new".to_string(),
                arg: "please".to_string()
            }
        );
    }

    #[test]
    fn test_parse_edit() {
        assert_eq!(
            parse_special_command("/edit 3 Actually, use Rust").unwrap(),
            SpecialCommand::EditMessage {
                message_id: 3,
                content: "Actually, use Rust".to_string()
            }
        );
        assert_eq!(
            parse_special_command("/edit #2 again").unwrap(),
            SpecialCommand::EditMessage {
                message_id: 2,
                content: "again".to_string()
            }
        );
    }

    #[test]
    fn test_parse_edit_errors() {
        assert!(matches!(
            parse_special_command("/edit").unwrap_err(),
            CommandError::MissingArgument { .. }
        ));
        assert!(matches!(
            parse_special_command("/edit 3").unwrap_err(),
            CommandError::MissingArgument { .. }
        ));
        assert!(matches!(
            parse_special_command("/edit three words here").unwrap_err(),
            CommandError::UnsupportedArgument { .. }
        ));
    }

    #[test]
    fn test_parse_remove_message() {
        assert_eq!(
            parse_special_command("/rm 4").unwrap(),
            SpecialCommand::DeleteMessage(4)
        );
        assert_eq!(
            parse_special_command("/RM #2").unwrap(),
            SpecialCommand::DeleteMessage(2)
        );
        assert!(matches!(
            parse_special_command("/rm").unwrap_err(),
            CommandError::MissingArgument { .. }
        ));
        assert!(matches!(
            parse_special_command("/rm last").unwrap_err(),
            CommandError::UnsupportedArgument { .. }
        ));
    }

    #[test]
    fn test_parse_image_keeps_path_case() {
        assert_eq!(
            parse_special_command("/image ~/Pictures/Cat.PNG").unwrap(),
            SpecialCommand::AttachImage("~/Pictures/Cat.PNG".to_string())
        );
    }

    #[test]
    fn test_parse_help_and_unknown() {
        assert_eq!(parse_special_command("/?").unwrap(), SpecialCommand::Help);
        let err = parse_special_command("/mode write").unwrap_err();
        assert_eq!(err, CommandError::UnknownCommand("/mode write".to_string()));
        assert!(err.to_string().contains("/help"));
    }
}
