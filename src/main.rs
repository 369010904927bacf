//! chatstream - streaming terminal chat client
//!
#![doc = "chatstream - streaming terminal chat client"]
#![doc = "Main entry point for the chatstream application."]

use anyhow::Result;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chatstream::cli::{Cli, Commands};
use chatstream::commands;
use chatstream::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose, cli.json_logs);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Chat { thread } => {
            if let Some(t) = &thread {
                tracing::debug!("Resuming thread: {}", t);
            }
            commands::chat::run_chat(config, thread, cli.ephemeral).await?;
            Ok(())
        }
        Commands::Send {
            prompt,
            thread,
            image,
        } => {
            tracing::info!("Sending one message");
            if let Some(path) = &image {
                tracing::debug!("Attaching image: {}", path.display());
            }
            commands::send::run_send(config, prompt, thread, image, cli.ephemeral).await?;
            Ok(())
        }
        Commands::Edit {
            thread,
            message,
            content,
        } => {
            tracing::info!("Editing message {} in thread {}", message, thread);
            commands::edit::run_edit(config, thread, message, content, cli.ephemeral).await?;
            Ok(())
        }
        Commands::Threads { command } => {
            tracing::info!("Starting threads command");
            commands::threads::handle_threads(config, command, cli.ephemeral).await?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so they never mix with streamed replies on stdout.
fn init_tracing(verbose: bool, json_logs: bool) {
    let default_filter = if verbose {
        "chatstream=debug"
    } else {
        "chatstream=warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);

    if json_logs {
        let stderr_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr);
        registry.with(stderr_layer).init();
    } else {
        let stderr_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);
        registry.with(stderr_layer).init();
    }
}
