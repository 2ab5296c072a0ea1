//! The `hibiscus generate` command.

use crate::gallery::{download, ConsoleNotifier, FsGallery};
use clap::Args;
use console::style;
use hibiscus_core::error::ErrorKind;
use hibiscus_core::jobs::JobStatus;
use hibiscus_core::{Config, Hibiscus, JobKind, Params};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

/// Arguments for the `generate` command.
#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Text prompt describing the image
    pub prompt: String,

    /// Model to use (defaults to config)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Image width in pixels
    #[arg(long)]
    pub width: Option<i64>,

    /// Image height in pixels
    #[arg(long)]
    pub height: Option<i64>,

    /// Seed for reproducible output (negative = random)
    #[arg(long)]
    pub seed: Option<i64>,

    /// Number of images to generate in parallel
    #[arg(short, long, default_value_t = 1)]
    pub count: u32,

    /// Upstream prompt enhancement
    #[arg(long)]
    pub enhance: bool,

    /// Directory to save results into (overrides config)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Skip writing results to the download directory
    #[arg(long)]
    pub no_download: bool,
}

/// Execute the generate command.
pub async fn execute(args: GenerateArgs, config: Config) -> anyhow::Result<()> {
    let mut params = config.defaults.image.to_params();
    apply_image_overrides(
        &mut params,
        args.model.as_deref(),
        args.width,
        args.height,
        args.seed,
        args.enhance,
    );
    run_jobs(
        &config,
        JobKind::TextToImage,
        &args.prompt,
        params,
        args.count,
        args.output.as_deref(),
        args.no_download,
    )
    .await
}

pub(crate) fn apply_image_overrides(
    params: &mut Params,
    model: Option<&str>,
    width: Option<i64>,
    height: Option<i64>,
    seed: Option<i64>,
    enhance: bool,
) {
    if let Some(model) = model {
        params.set("model", model);
    }
    if let Some(width) = width {
        params.set("width", width);
    }
    if let Some(height) = height {
        params.set("height", height);
    }
    if let Some(seed) = seed {
        params.set("seed", seed);
    }
    if enhance {
        params.set("enhance", true);
    }
}

/// Submit `count` jobs, watch them, and download the successes.
///
/// Shared by `generate` and `edit`; the jobs run concurrently and each
/// reports its own progress line.
pub(crate) async fn run_jobs(
    config: &Config,
    kind: JobKind,
    prompt: &str,
    params: Params,
    count: u32,
    output_override: Option<&str>,
    no_download: bool,
) -> anyhow::Result<()> {
    let hibiscus = Hibiscus::new(config);
    let scheduler = hibiscus.scheduler(
        Arc::new(FsGallery::new(config.gallery_dir())),
        Arc::new(ConsoleNotifier),
    );

    let download_dir = match output_override {
        Some(dir) => std::path::PathBuf::from(shellexpand::tilde(dir).into_owned()),
        None => config.download_dir(),
    };
    let should_download = config.downloads.auto_download && !no_download;

    let progress = MultiProgress::new();
    let spinner_style = ProgressStyle::with_template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());

    let mut handles = Vec::new();
    for n in 1..=count {
        let id = scheduler.submit(kind, prompt, params.clone());
        let bar = progress.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style.clone());
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message(format!("job {n}/{count}: generating"));
        handles.push((id, n, bar));
    }

    let mut failures = 0u32;
    for (id, n, bar) in handles {
        let Some(job) = watch(&scheduler, id, n, count, &bar).await else {
            bar.finish_with_message(format!("job {n}/{count}: lost"));
            failures += 1;
            continue;
        };

        match job.status {
            JobStatus::Completed => {
                let result = job.result.as_ref();
                let attempts = result.map(|r| r.attempts).unwrap_or(1);
                bar.finish_with_message(format!(
                    "job {n}/{count}: {} ({attempts} attempt{})",
                    style("done").green(),
                    if attempts == 1 { "" } else { "s" }
                ));
                if should_download {
                    if let Some(result) = result {
                        let path = download(
                            &download_dir,
                            &config.downloads.filename_format,
                            prompt,
                            kind,
                            &result.bytes,
                        )
                        .await?;
                        scheduler.usage().record_download();
                        println!("{}", path.display());
                    }
                }
            }
            JobStatus::Failed => {
                failures += 1;
                let (kind, display) = job
                    .failure
                    .as_ref()
                    .map(|f| (f.kind, f.display.clone()))
                    .unwrap_or((ErrorKind::Generic, "unknown failure".into()));
                bar.finish_with_message(format!(
                    "job {n}/{count}: {} - {display}",
                    style("failed").red()
                ));
                if let Some(hint) = remedy_hint(kind) {
                    eprintln!("  {}", style(hint).dim());
                }
            }
            JobStatus::Cancelled => {
                bar.finish_with_message(format!("job {n}/{count}: cancelled"));
            }
            _ => {}
        }
    }

    if failures == count {
        anyhow::bail!("all {count} job(s) failed");
    }
    Ok(())
}

async fn watch(
    scheduler: &hibiscus_core::JobScheduler,
    id: hibiscus_core::JobId,
    n: u32,
    count: u32,
    bar: &ProgressBar,
) -> Option<hibiscus_core::Job> {
    loop {
        let job = scheduler.job(id)?;
        if job.status.is_terminal() {
            return Some(job);
        }
        if job.status == JobStatus::Retrying {
            if job.safety_attempts > 0 {
                bar.set_message(format!(
                    "job {n}/{count}: filtered, retrying ({})",
                    job.safety_attempts
                ));
            } else {
                bar.set_message(format!("job {n}/{count}: connection trouble, retrying"));
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn remedy_hint(kind: ErrorKind) -> Option<&'static str> {
    match kind {
        ErrorKind::Auth => Some("check your API keys with `hibiscus config show`"),
        ErrorKind::Balance => Some("top up your balance or add more API keys"),
        ErrorKind::Safety | ErrorKind::ExhaustedRetries => {
            Some("the content filter kept rejecting this prompt; try rephrasing it")
        }
        ErrorKind::ResolutionLimit => Some("reduce --width/--height for this model"),
        ErrorKind::RateLimited => Some("wait a moment and try again"),
        ErrorKind::Network => Some("check your connection"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_defaults() {
        let mut params = Config::default().defaults.image.to_params();
        apply_image_overrides(&mut params, Some("turbo"), Some(512), None, Some(9), false);
        assert_eq!(params.get("model").unwrap().to_string(), "turbo");
        assert_eq!(params.get("width").unwrap().to_string(), "512");
        assert_eq!(params.get("height").unwrap().to_string(), "1024");
        assert_eq!(params.get("seed").unwrap().to_string(), "9");
    }

    #[test]
    fn test_remedy_hints_cover_actionable_kinds() {
        assert!(remedy_hint(ErrorKind::Auth).is_some());
        assert!(remedy_hint(ErrorKind::Balance).is_some());
        assert!(remedy_hint(ErrorKind::ExhaustedRetries).is_some());
        assert!(remedy_hint(ErrorKind::Generic).is_none());
    }
}
