//! Startup reconciliation of the watched folder against the state store.

use std::path::Path;

use reel_models::VideoStatus;
use reel_store::StateStore;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::WorkerResult;
use crate::video::is_video_file;

/// Names of the video files directly inside `dir`, sorted.
///
/// Subfolders and files whose names are not valid UTF-8 are skipped.
pub async fn scan_video_files(dir: &Path) -> WorkerResult<Vec<String>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut names = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_video_file(&path) {
            continue;
        }
        match entry.file_type().await {
            Ok(ft) if ft.is_file() => {}
            Ok(_) => continue,
            Err(e) => {
                warn!(path = %path.display(), "Skipping unreadable entry: {}", e);
                continue;
            }
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(name) => warn!("Skipping file with non UTF-8 name: {:?}", name),
        }
    }

    names.sort();
    Ok(names)
}

/// Video files in `dir` the pipeline still has work for: no record yet, or a
/// record that is not terminal.
pub async fn pending_files(store: &StateStore, dir: &Path) -> WorkerResult<Vec<String>> {
    let files = scan_video_files(dir).await?;
    let records = store.all().await?;

    let pending: Vec<String> = files
        .into_iter()
        .filter(|name| match records.get(name) {
            Some(record) if record.is_terminal() => {
                debug!(file = %name, status = %record.status, "Already done");
                false
            }
            _ => true,
        })
        .collect();

    info!(count = pending.len(), dir = %dir.display(), "Reconciled watched folder");
    Ok(pending)
}

/// Mark every video in `dir` without a record as already uploaded, so the
/// worker leaves a pre-existing library alone. Returns how many were marked.
pub async fn backfill(store: &StateStore, dir: &Path) -> WorkerResult<usize> {
    let files = scan_video_files(dir).await?;
    let marked = store.insert_missing(files, VideoStatus::Uploaded).await?;
    info!(marked, dir = %dir.display(), "Backfill complete");
    Ok(marked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::RecordUpdate;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    #[tokio::test]
    async fn test_scan_only_video_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.MP4");
        touch(dir.path(), "a.mkv");
        touch(dir.path(), "notes.txt");
        std::fs::create_dir(dir.path().join("nested.mp4")).unwrap();

        let names = scan_video_files(dir.path()).await.unwrap();
        assert_eq!(names, vec!["a.mkv", "b.MP4"]);
    }

    #[tokio::test]
    async fn test_pending_skips_terminal_records() {
        let dir = tempfile::tempdir().unwrap();
        let watch = dir.path().join("watch");
        std::fs::create_dir(&watch).unwrap();
        for name in ["new.mp4", "done.mp4", "retry.mp4", "half.mp4"] {
            touch(&watch, name);
        }

        let store = StateStore::new(dir.path().join("state.json"));
        store
            .update("done.mp4", RecordUpdate::status(VideoStatus::Uploaded))
            .await
            .unwrap();
        store
            .update("retry.mp4", RecordUpdate::status(VideoStatus::UploadFailed))
            .await
            .unwrap();
        store
            .update("half.mp4", RecordUpdate::status(VideoStatus::Analyzing))
            .await
            .unwrap();

        let pending = pending_files(&store, &watch).await.unwrap();
        assert_eq!(pending, vec!["half.mp4", "new.mp4", "retry.mp4"]);
    }

    #[tokio::test]
    async fn test_backfill_marks_only_unknown_files() {
        let dir = tempfile::tempdir().unwrap();
        let watch = dir.path().join("watch");
        std::fs::create_dir(&watch).unwrap();
        touch(&watch, "old.mp4");
        touch(&watch, "tracked.mp4");

        let store = StateStore::new(dir.path().join("state.json"));
        store
            .update("tracked.mp4", RecordUpdate::status(VideoStatus::Analyzing))
            .await
            .unwrap();

        assert_eq!(backfill(&store, &watch).await.unwrap(), 1);
        let table = store.all().await.unwrap();
        assert_eq!(table["old.mp4"].status, VideoStatus::Uploaded);
        assert_eq!(table["tracked.mp4"].status, VideoStatus::Analyzing);
        assert!(pending_files(&store, &watch).await.unwrap() == vec!["tracked.mp4"]);
    }
}
