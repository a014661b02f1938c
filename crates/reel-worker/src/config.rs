//! Worker configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Gemini models tried in order when `GEMINI_MODEL` is unset.
pub const DEFAULT_GEMINI_MODELS: &[&str] = &[
    "gemini-2.5-flash",
    "gemini-2.5-pro",
    "gemini-2.5-flash-lite",
];

/// Where the worker reads, writes, and keeps its state.
#[derive(Debug, Clone)]
pub struct PathsConfig {
    /// Folder watched for new videos
    pub watch_dir: PathBuf,
    /// Folder montages are written to
    pub output_dir: PathBuf,
    /// JSON state document
    pub state_file: PathBuf,
}

/// File stability check applied to watched files before they are queued.
#[derive(Debug, Clone)]
pub struct StabilityConfig {
    /// Delay between size polls
    pub interval: Duration,
    /// Consecutive unchanged polls required
    pub checks: u32,
    /// Give up on a file that keeps changing for this long
    pub timeout: Duration,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            checks: 3,
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    /// Models tried in order until one succeeds
    pub models: Vec<String>,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("models", &self.models)
            .finish()
    }
}

#[derive(Clone)]
pub struct YouTubeConfig {
    pub access_token: String,
    pub privacy_status: String,
}

impl std::fmt::Debug for YouTubeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YouTubeConfig")
            .field("access_token", &"<redacted>")
            .field("privacy_status", &self.privacy_status)
            .finish()
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub paths: PathsConfig,
    /// Maximum pipeline runs in flight
    pub max_concurrent: usize,
    /// Upper bound on each external call (analysis, encode, upload)
    pub stage_timeout: Duration,
    /// How long shutdown waits for running files
    pub shutdown_timeout: Duration,
    pub stability: StabilityConfig,
    pub gemini: GeminiConfig,
    /// Publishing is disabled when unset
    pub youtube: Option<YouTubeConfig>,
    /// Explicit FFmpeg binary; otherwise resolved on `PATH`
    pub ffmpeg_path: Option<PathBuf>,
}

impl PathsConfig {
    /// Create paths config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> WorkerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let watch_dir = lookup("WATCH_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| WorkerError::config_error("WATCH_DIR not set"))?;
        if !watch_dir.is_dir() {
            return Err(WorkerError::config_error(format!(
                "WATCH_DIR {} is not an existing directory",
                watch_dir.display()
            )));
        }
        // Watch events carry absolute paths.
        let watch_dir = watch_dir.canonicalize().map_err(|e| {
            WorkerError::config_error(format!("cannot resolve WATCH_DIR {}: {}", watch_dir.display(), e))
        })?;

        let output_dir = lookup("OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./output"));
        // Montages written into the watched folder would be picked up as new input.
        if same_dir(&watch_dir, &output_dir) {
            return Err(WorkerError::config_error(
                "OUTPUT_DIR must not be the same folder as WATCH_DIR",
            ));
        }

        Ok(Self {
            watch_dir,
            output_dir,
            state_file: state_file_from_lookup(&lookup),
        })
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> WorkerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let paths = PathsConfig::from_lookup(&lookup)?;

        let api_key = lookup("GEMINI_API_KEY")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| WorkerError::config_error("GEMINI_API_KEY not set"))?;
        let models = lookup("GEMINI_MODEL")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_GEMINI_MODELS.iter().map(|m| m.to_string()).collect());

        let max_concurrent = lookup("MAX_CONCURRENT")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(1);
        if max_concurrent == 0 {
            return Err(WorkerError::config_error("MAX_CONCURRENT must be at least 1"));
        }

        let youtube = lookup("YOUTUBE_ACCESS_TOKEN")
            .filter(|s| !s.trim().is_empty())
            .map(|access_token| YouTubeConfig {
                access_token,
                privacy_status: lookup("YOUTUBE_PRIVACY_STATUS")
                    .unwrap_or_else(|| "private".to_string()),
            });

        let defaults = StabilityConfig::default();

        Ok(Self {
            paths,
            max_concurrent,
            stage_timeout: Duration::from_secs(
                lookup("STAGE_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(7200),
            ),
            shutdown_timeout: Duration::from_secs(
                lookup("SHUTDOWN_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            stability: StabilityConfig {
                interval: lookup("STABILITY_INTERVAL_MS")
                    .and_then(|s| s.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.interval),
                checks: lookup("STABILITY_CHECKS")
                    .and_then(|s| s.parse::<u32>().ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(defaults.checks),
                timeout: lookup("STABILITY_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.timeout),
            },
            gemini: GeminiConfig { api_key, models },
            youtube,
            ffmpeg_path: lookup("FFMPEG_PATH")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        })
    }
}

/// Location of the state document (`STATE_FILE`, default `./state.json`).
pub fn state_file_from_env() -> PathBuf {
    state_file_from_lookup(env_lookup)
}

fn state_file_from_lookup<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    lookup("STATE_FILE")
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./state.json"))
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: HashMap<&'static str, String>) -> impl Fn(&str) -> Option<String> {
        move |k: &str| vars.get(k).cloned()
    }

    fn base(dir: &tempfile::TempDir) -> HashMap<&'static str, String> {
        HashMap::from([
            ("WATCH_DIR", dir.path().display().to_string()),
            ("GEMINI_API_KEY", "key".to_string()),
        ])
    }

    #[test]
    fn test_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkerConfig::from_lookup(lookup(base(&dir))).unwrap();

        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.stage_timeout, Duration::from_secs(7200));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.paths.output_dir, PathBuf::from("./output"));
        assert_eq!(config.paths.state_file, PathBuf::from("./state.json"));
        assert_eq!(config.stability.checks, 3);
        assert_eq!(config.gemini.models[0], DEFAULT_GEMINI_MODELS[0]);
        assert!(config.youtube.is_none());
        assert!(config.ffmpeg_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let mut vars = base(&dir);
        vars.insert("MAX_CONCURRENT", "4".into());
        vars.insert("GEMINI_MODEL", "gemini-x, gemini-y".into());
        vars.insert("YOUTUBE_ACCESS_TOKEN", "tok".into());
        vars.insert("STABILITY_INTERVAL_MS", "50".into());

        let config = WorkerConfig::from_lookup(lookup(vars)).unwrap();
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.gemini.models, vec!["gemini-x", "gemini-y"]);
        let youtube = config.youtube.unwrap();
        assert_eq!(youtube.privacy_status, "private");
        assert_eq!(config.stability.interval, Duration::from_millis(50));
    }

    #[test]
    fn test_missing_required() {
        let dir = tempfile::tempdir().unwrap();

        let mut vars = base(&dir);
        vars.remove("GEMINI_API_KEY");
        assert!(matches!(
            WorkerConfig::from_lookup(lookup(vars)),
            Err(WorkerError::ConfigError(_))
        ));

        let mut vars = base(&dir);
        vars.insert("WATCH_DIR", dir.path().join("nope").display().to_string());
        assert!(matches!(
            WorkerConfig::from_lookup(lookup(vars)),
            Err(WorkerError::ConfigError(_))
        ));
    }

    #[test]
    fn test_relative_watch_dir_is_made_absolute() {
        let dir = tempfile::tempdir_in(".").unwrap();
        let relative = dir.path().strip_prefix(".").unwrap_or(dir.path()).to_path_buf();
        assert!(relative.is_relative());

        let mut vars = base(&dir);
        vars.insert("WATCH_DIR", relative.display().to_string());
        let paths = PathsConfig::from_lookup(lookup(vars)).unwrap();

        assert!(paths.watch_dir.is_absolute());
        assert_eq!(paths.watch_dir, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_output_dir_must_differ_from_watch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut vars = base(&dir);
        vars.insert("OUTPUT_DIR", dir.path().display().to_string());
        assert!(PathsConfig::from_lookup(lookup(vars)).is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut vars = base(&dir);
        vars.insert("MAX_CONCURRENT", "0".into());
        assert!(WorkerConfig::from_lookup(lookup(vars)).is_err());
    }

    #[test]
    fn test_secrets_redacted_in_debug() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkerConfig::from_lookup(lookup(base(&dir))).unwrap();
        assert!(!format!("{:?}", config).contains("\"key\""));
    }
}
