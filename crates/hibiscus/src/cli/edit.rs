//! The `hibiscus edit` command for image-to-image editing.

use super::generate::{apply_image_overrides, run_jobs};
use clap::Args;
use hibiscus_core::{Config, JobKind};

/// Arguments for the `edit` command.
#[derive(Args, Debug)]
pub struct EditArgs {
    /// Text prompt describing the edit
    pub prompt: String,

    /// URL of the source image to edit
    #[arg(short, long)]
    pub image: String,

    /// Model to use (defaults to config)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Output width in pixels
    #[arg(long)]
    pub width: Option<i64>,

    /// Output height in pixels
    #[arg(long)]
    pub height: Option<i64>,

    /// Seed for reproducible output (negative = random)
    #[arg(long)]
    pub seed: Option<i64>,

    /// Number of edits to generate in parallel
    #[arg(short, long, default_value_t = 1)]
    pub count: u32,

    /// Directory to save results into (overrides config)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Skip writing results to the download directory
    #[arg(long)]
    pub no_download: bool,
}

/// Execute the edit command.
pub async fn execute(args: EditArgs, config: Config) -> anyhow::Result<()> {
    let mut params = config.defaults.edit.to_params();
    apply_image_overrides(
        &mut params,
        args.model.as_deref(),
        args.width,
        args.height,
        args.seed,
        false,
    );
    // The locator builder moves this to the end of the query string, where
    // the API requires it.
    params.set("image", args.image.as_str());

    run_jobs(
        &config,
        JobKind::ImageEdit,
        &args.prompt,
        params,
        args.count,
        args.output.as_deref(),
        args.no_download,
    )
    .await
}
