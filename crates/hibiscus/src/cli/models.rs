//! The `hibiscus models` command for model listings and account status.

use clap::{Args, Subcommand};
use console::style;
use hibiscus_core::{Config, Hibiscus, ModelInfo};

/// Arguments for the `models` command.
#[derive(Args, Debug)]
pub struct ModelsArgs {
    #[command(subcommand)]
    pub command: ModelsCommand,
}

/// Subcommands for model and account queries.
#[derive(Subcommand, Debug)]
pub enum ModelsCommand {
    /// List available image models
    Image,

    /// List available text models
    Text,

    /// Show the account balance for the current API key
    Balance,
}

/// Execute the models command.
pub async fn execute(args: ModelsArgs, config: Config) -> anyhow::Result<()> {
    let hibiscus = Hibiscus::new(&config);

    match args.command {
        ModelsCommand::Image => {
            print_catalog("Image models", &hibiscus.image_models().await?);
        }
        ModelsCommand::Text => {
            print_catalog("Text models", &hibiscus.text_models().await?);
        }
        ModelsCommand::Balance => match hibiscus.account_balance().await {
            Some(balance) => println!("balance: {balance:.2}"),
            None => {
                println!(
                    "balance unavailable {}",
                    style("(no API key, or the account endpoint is down)").dim()
                );
            }
        },
    }
    Ok(())
}

fn print_catalog(title: &str, models: &[ModelInfo]) {
    println!("{}", style(title).bold());
    if models.is_empty() {
        println!("  (none reported)");
        return;
    }
    for model in models {
        match &model.description {
            Some(description) => println!("  {:<16} {description}", model.name),
            None => println!("  {}", model.name),
        }
    }
}
