//! The `hibiscus video` command.
//!
//! Video runs as a single long request under a wall-clock deadline rather
//! than through the job scheduler; a generation can legitimately take
//! minutes, and there is no point retrying the content filter mid-render.

use crate::gallery::download;
use clap::Args;
use console::style;
use hibiscus_core::{Config, Hibiscus, JobKind};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Arguments for the `video` command.
#[derive(Args, Debug)]
pub struct VideoArgs {
    /// Text prompt describing the video
    pub prompt: String,

    /// Model to use (defaults to config)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Clip length in seconds
    #[arg(short, long)]
    pub duration: Option<i64>,

    /// Aspect ratio: landscape, portrait, or square
    #[arg(long)]
    pub aspect_ratio: Option<String>,

    /// Generate audio as well
    #[arg(long)]
    pub audio: bool,

    /// Directory to save the result into (overrides config)
    #[arg(short, long)]
    pub output: Option<String>,
}

/// Execute the video command.
pub async fn execute(args: VideoArgs, config: Config) -> anyhow::Result<()> {
    let mut params = config.defaults.video.to_params();
    if let Some(model) = args.model.as_deref() {
        params.set("model", model);
    }
    if let Some(duration) = args.duration {
        params.set("duration", duration);
    }
    if let Some(ratio) = args.aspect_ratio.as_deref() {
        params.set("aspectRatio", ratio);
    }
    if args.audio {
        params.set("audio", true);
    }

    let hibiscus = Hibiscus::new(&config);

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    bar.set_message(format!(
        "rendering video (up to {}s)",
        config.api.video_timeout_secs
    ));

    let result = hibiscus.generate_video(&args.prompt, &params).await;
    match result {
        Ok(bytes) => {
            bar.finish_with_message(format!("{}", style("done").green()));
            let dir = match args.output.as_deref() {
                Some(dir) => std::path::PathBuf::from(shellexpand::tilde(dir).into_owned()),
                None => config.download_dir(),
            };
            let path = download(
                &dir,
                &config.downloads.filename_format,
                &args.prompt,
                JobKind::Video,
                &bytes,
            )
            .await?;
            println!("{}", path.display());
            Ok(())
        }
        Err(err) => {
            bar.finish_with_message(format!("{}", style("failed").red()));
            Err(err.into())
        }
    }
}
