//! Intercessio command-line interface.
//!
//! Runs the signing daemon, manages keys, and drives a running daemon
//! over its control socket.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// Intercessio - a self-hosted Nostr remote signer
#[derive(Parser)]
#[command(name = "intercessio")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration directory path
    #[arg(short, long, default_value = intercessio_core::config::DEFAULT_CONFIG_DIR)]
    dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signing daemon
    Start,

    /// Manage signing keys
    #[command(subcommand)]
    Key(KeyCommands),

    /// List sessions
    Sessions,

    /// Show recent activity
    Activity,

    /// List pending approvals
    Approvals,

    /// Approve a pending request
    Approve {
        /// Approval task id
        id: String,
    },

    /// Reject a pending request
    Reject {
        /// Approval task id
        id: String,
    },

    /// Start a bunker session and print its pairing URI
    Bunker {
        /// Key id (defaults to the active key)
        #[arg(long)]
        key: Option<String>,

        /// Session alias
        #[arg(short, long, default_value = "")]
        alias: String,

        /// Relay URLs
        #[arg(short, long, required = true)]
        relay: Vec<String>,

        /// Approve every request without review
        #[arg(long)]
        auto_approve: bool,

        /// Policy template id
        #[arg(short, long)]
        template: Option<String>,
    },

    /// Pair with a client's nostrconnect:// URI
    Connect {
        /// The nostrconnect:// URI
        uri: String,

        /// Key id (defaults to the active key)
        #[arg(long)]
        key: Option<String>,

        /// Session alias
        #[arg(short, long, default_value = "")]
        alias: String,

        /// Extra relay URLs
        #[arg(short, long)]
        relay: Vec<String>,

        /// Approve every request without review
        #[arg(long)]
        auto_approve: bool,

        /// Policy template id
        #[arg(short, long)]
        template: Option<String>,
    },

    /// Stop a session (keeps its record)
    Stop {
        /// Session id
        id: String,
    },

    /// Stop a session and delete its record
    Delete {
        /// Session id
        id: String,
    },

    /// Rename a session
    Rename {
        /// Session id
        id: String,

        /// New alias
        alias: String,
    },

    /// Change a session's policy template
    Template {
        /// Session id
        id: String,

        /// Policy template id
        template: String,
    },

    /// List available policy templates
    Policies,

    /// Check whether the daemon is running
    Ping,

    /// Shut the daemon down
    Shutdown,
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Generate a new signing key
    Generate {
        /// Display label
        #[arg(short, long, default_value = "")]
        label: String,
    },

    /// Import an existing key (hex or nsec)
    Import {
        /// The secret key
        secret: String,

        /// Display label
        #[arg(short, long, default_value = "")]
        label: String,
    },

    /// List keys
    List,

    /// Select the key new sessions use
    Use {
        /// Key id
        id: String,
    },

    /// Delete a key and its vault entry
    Delete {
        /// Key id
        id: String,

        /// Confirm deletion
        #[arg(long)]
        confirm: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let dir = shellexpand::tilde(&cli.dir).to_string();

    match cli.command {
        Commands::Start => commands::start_daemon(&dir).await?,
        Commands::Key(key) => match key {
            KeyCommands::Generate { label } => commands::key_generate(&dir, &label)?,
            KeyCommands::Import { secret, label } => commands::key_import(&dir, &secret, &label)?,
            KeyCommands::List => commands::key_list(&dir)?,
            KeyCommands::Use { id } => commands::key_use(&dir, &id)?,
            KeyCommands::Delete { id, confirm } => commands::key_delete(&dir, &id, confirm)?,
        },
        Commands::Sessions => commands::list_sessions(&dir).await?,
        Commands::Activity => commands::list_activity(&dir).await?,
        Commands::Approvals => commands::list_approvals(&dir).await?,
        Commands::Approve { id } => commands::resolve_approval(&dir, &id, true).await?,
        Commands::Reject { id } => commands::resolve_approval(&dir, &id, false).await?,
        Commands::Bunker { key, alias, relay, auto_approve, template } => {
            commands::start_bunker(&dir, key, &alias, relay, auto_approve, template).await?;
        }
        Commands::Connect { uri, key, alias, relay, auto_approve, template } => {
            commands::start_nostr_connect(&dir, key, &alias, relay, &uri, auto_approve, template)
                .await?;
        }
        Commands::Stop { id } => commands::stop_session(&dir, &id, false).await?,
        Commands::Delete { id } => commands::stop_session(&dir, &id, true).await?,
        Commands::Rename { id, alias } => commands::rename_session(&dir, &id, &alias).await?,
        Commands::Template { id, template } => {
            commands::update_template(&dir, &id, &template).await?;
        }
        Commands::Policies => commands::list_policies(),
        Commands::Ping => commands::ping(&dir).await?,
        Commands::Shutdown => commands::shutdown(&dir).await?,
    }

    Ok(())
}
