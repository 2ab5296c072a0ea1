//! Hibiscus CLI - AI image and video generation from the command line.
//!
//! Hibiscus talks to the Pollinations generation API, handling credential
//! rotation, content-filter retries, and parallel jobs so a prompt either
//! produces a file or a clear reason why not.
//!
//! # Usage
//!
//! ```bash
//! # Generate an image
//! hibiscus generate "a red fox at dawn"
//!
//! # Generate four variations in parallel
//! hibiscus generate "a red fox at dawn" --count 4
//!
//! # Edit an existing image
//! hibiscus edit "make it night" --image https://example.com/fox.png
//!
//! # Generate a short video
//! hibiscus video "a fox running through snow"
//!
//! # List available models
//! hibiscus models image
//!
//! # View configuration
//! hibiscus config show
//! ```

use clap::{Parser, Subcommand};

mod cli;
mod gallery;
mod logging;

/// Hibiscus - AI image and video generation from the command line.
#[derive(Parser, Debug)]
#[command(name = "hibiscus")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate images from a text prompt
    Generate(cli::generate::GenerateArgs),

    /// Edit an existing image with a text prompt
    Edit(cli::edit::EditArgs),

    /// Generate a short video from a text prompt
    Video(cli::video::VideoArgs),

    /// List models and check account balance
    Models(cli::models::ModelsArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't initialized yet, so config warnings go to stderr directly.
    let config = match hibiscus_core::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `hibiscus config path`."
            );
            hibiscus_core::Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Hibiscus v{}", hibiscus_core::VERSION);

    match cli.command {
        Commands::Generate(args) => cli::generate::execute(args, config).await,
        Commands::Edit(args) => cli::edit::execute(args, config).await,
        Commands::Video(args) => cli::video::execute(args, config).await,
        Commands::Models(args) => cli::models::execute(args, config).await,
        Commands::Config(args) => cli::config::execute(args).await,
    }
}
