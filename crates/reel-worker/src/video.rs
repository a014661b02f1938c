//! Recognizing video files.

use std::path::Path;

/// Extensions (lowercase) treated as videos.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "avi", "webm", "m4v"];

/// Whether `path` has a video extension, case-insensitively.
pub fn is_video_file(path: &Path) -> bool {
    extension(path).is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

/// MIME type for a video path, `application/octet-stream` when unknown.
pub fn mime_type(path: &Path) -> &'static str {
    match extension(path).as_deref() {
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("webm") => "video/webm",
        Some("m4v") => "video/x-m4v",
        _ => "application/octet-stream",
    }
}

/// Montage file name for a source file: `<stem>_highlights.mp4`.
pub fn montage_file_name(source_name: &str) -> String {
    let stem = Path::new(source_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| source_name.to_string());
    format!("{stem}_highlights.mp4")
}

fn extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("/in/match.mp4")));
        assert!(is_video_file(Path::new("CLIP.MOV")));
        assert!(is_video_file(Path::new("a.m4v")));
        assert!(!is_video_file(Path::new("notes.txt")));
        assert!(!is_video_file(Path::new("mp4")));
        assert!(!is_video_file(Path::new("state.json.tmp")));
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(mime_type(Path::new("a.MKV")), "video/x-matroska");
        assert_eq!(mime_type(Path::new("a.bin")), "application/octet-stream");
    }

    #[test]
    fn test_montage_file_name() {
        assert_eq!(montage_file_name("match day.mov"), "match day_highlights.mp4");
        assert_eq!(montage_file_name("clip.final.mp4"), "clip.final_highlights.mp4");
    }
}
