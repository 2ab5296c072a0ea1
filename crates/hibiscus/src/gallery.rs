//! Filesystem gallery and console notifications.
//!
//! The gallery stores each result as a payload file plus a JSON sidecar with
//! its metadata; listing reads the sidecars back. Saves are best-effort: the
//! scheduler treats a `None` as "keep the bytes in memory", so failures here
//! never kill a job that already succeeded.

use async_trait::async_trait;
use console::style;
use hibiscus_core::gallery::{Gallery, Notifier, StoredItem, ToastLevel};
use hibiscus_core::{JobKind, Params};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

fn extension_for(kind: JobKind) -> &'static str {
    match kind {
        JobKind::TextToImage | JobKind::ImageEdit => "png",
        JobKind::Video => "mp4",
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Keep prompts usable as filenames: alphanumerics and spaces only, spaces
/// collapsed to dashes, truncated.
pub fn sanitize_filename(prompt: &str) -> String {
    let cleaned: String = prompt
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    let mut name = cleaned.split_whitespace().collect::<Vec<_>>().join("-");
    name.truncate(60);
    if name.is_empty() {
        name.push_str("untitled");
    }
    name
}

/// Filename for a downloaded result, honoring the configured format.
pub fn download_filename(format: &str, prompt: &str, kind: JobKind) -> String {
    let ext = extension_for(kind);
    let stamp = unix_now();
    match format {
        "prompt" => format!("{}.{ext}", sanitize_filename(prompt)),
        "timestamp" => format!("{stamp}.{ext}"),
        _ => format!("{}-{stamp}.{ext}", sanitize_filename(prompt)),
    }
}

/// Gallery backed by a directory of payload files and JSON sidecars.
pub struct FsGallery {
    dir: PathBuf,
}

impl FsGallery {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn sidecar_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn try_save(
        &self,
        kind: JobKind,
        prompt: &str,
        params: &Params,
        bytes: &[u8],
    ) -> std::io::Result<StoredItem> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let saved_at = unix_now();
        // Millisecond suffix keeps ids unique within a second of parallel
        // completions.
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_millis())
            .unwrap_or(0);
        let id = format!("{kind}-{saved_at}{millis:03}");

        let path = self.dir.join(format!("{id}.{}", extension_for(kind)));
        tokio::fs::write(&path, bytes).await?;

        let item = StoredItem {
            id: id.clone(),
            kind,
            prompt: prompt.to_string(),
            params: params.clone(),
            path: Some(path),
            saved_at,
        };
        let sidecar = serde_json::to_vec_pretty(&item)?;
        tokio::fs::write(self.sidecar_path(&id), sidecar).await?;
        debug!(%id, "saved to gallery");
        Ok(item)
    }
}

#[async_trait]
impl Gallery for FsGallery {
    async fn save(
        &self,
        kind: JobKind,
        prompt: &str,
        params: &Params,
        bytes: &[u8],
    ) -> Option<StoredItem> {
        match self.try_save(kind, prompt, params, bytes).await {
            Ok(item) => Some(item),
            Err(err) => {
                warn!(error = %err, dir = %self.dir.display(), "gallery save failed");
                None
            }
        }
    }

    async fn remove(&self, id: &str) -> bool {
        let sidecar = self.sidecar_path(id);
        let Ok(raw) = tokio::fs::read(&sidecar).await else {
            return false;
        };
        if let Ok(item) = serde_json::from_slice::<StoredItem>(&raw) {
            if let Some(path) = item.path {
                let _ = tokio::fs::remove_file(path).await;
            }
        }
        tokio::fs::remove_file(sidecar).await.is_ok()
    }

    async fn list(&self) -> Vec<StoredItem> {
        let mut items = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return items;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(raw) => match serde_json::from_slice::<StoredItem>(&raw) {
                    Ok(item) => items.push(item),
                    Err(err) => warn!(path = %path.display(), error = %err, "bad sidecar"),
                },
                Err(err) => warn!(path = %path.display(), error = %err, "unreadable sidecar"),
            }
        }
        items.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        items
    }
}

/// Prints notifications to stderr with console styling.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn toast(&self, level: ToastLevel, message: &str) {
        let prefix = match level {
            ToastLevel::Info => style("info").cyan(),
            ToastLevel::Success => style("ok").green(),
            ToastLevel::Warning => style("warn").yellow(),
            ToastLevel::Error => style("error").red(),
        };
        eprintln!("{prefix}: {message}");
    }

    fn panel(&self, title: &str, message: &str) {
        eprintln!();
        eprintln!("{}", style(title).red().bold());
        eprintln!("  {message}");
        eprintln!();
    }
}

/// Write a result to the download directory, creating it as needed.
pub async fn download(
    dir: &Path,
    format: &str,
    prompt: &str,
    kind: JobKind,
    bytes: &[u8],
) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(download_filename(format, prompt, kind));
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("A red fox!"), "a-red-fox");
        assert_eq!(sanitize_filename("  spaced   out  "), "spaced-out");
        assert_eq!(sanitize_filename("///"), "untitled");
        assert!(sanitize_filename(&"x".repeat(100)).len() <= 60);
    }

    #[test]
    fn test_download_filename_formats() {
        assert_eq!(
            download_filename("prompt", "a fox", JobKind::TextToImage),
            "a-fox.png"
        );
        let both = download_filename("both", "a fox", JobKind::Video);
        assert!(both.starts_with("a-fox-"));
        assert!(both.ends_with(".mp4"));
        let stamp = download_filename("timestamp", "a fox", JobKind::ImageEdit);
        assert!(stamp.ends_with(".png"));
        assert!(!stamp.contains("a-fox"));
    }

    #[tokio::test]
    async fn test_save_list_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = FsGallery::new(dir.path().to_path_buf());

        let mut params = Params::new();
        params.set("model", "flux").set("width", 1024_i64).set("seed", 7_i64);
        let item = gallery
            .save(JobKind::TextToImage, "a fox", &params, b"png-bytes")
            .await
            .unwrap();
        assert!(item.path.as_ref().unwrap().exists());

        let listed = gallery.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].prompt, "a fox");
        // Parameters survive the sidecar round trip.
        assert_eq!(listed[0].params.get("model").unwrap().to_string(), "flux");
        assert_eq!(listed[0].params.get("width").unwrap().to_string(), "1024");

        assert!(gallery.remove(&item.id).await);
        assert!(gallery.list().await.is_empty());
        assert!(!item.path.unwrap().exists());
    }

    #[tokio::test]
    async fn test_remove_unknown_id_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = FsGallery::new(dir.path().to_path_buf());
        assert!(!gallery.remove("nope").await);
    }

    #[tokio::test]
    async fn test_list_on_missing_dir_is_empty() {
        let gallery = FsGallery::new(PathBuf::from("/nonexistent/hibiscus-test"));
        assert!(gallery.list().await.is_empty());
    }
}
