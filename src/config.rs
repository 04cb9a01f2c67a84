use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Base URL of the chat server (default: http://localhost:8000)
    pub server_url: Option<String>,

    /// Ask for streamed replies when the profile supports them.
    pub stream: Option<bool>,

    /// Timeout for non-streaming requests.
    pub request_timeout_secs: Option<u64>,

    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

/// Timing of the post-turn refetch that catches the transcript up with the
/// server's copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub grace_ms: u64,
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            grace_ms: 1000,
            interval_ms: 1000,
            max_attempts: 5,
        }
    }
}

impl ReconcileConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg: Config = toml::from_str(&s)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }

    /// Server URL with precedence flag > `LOCALCHAT_SERVER_URL` > file > default.
    pub fn server_url(&self, flag: Option<&str>) -> String {
        flag.map(str::to_string)
            .or_else(|| std::env::var("LOCALCHAT_SERVER_URL").ok().filter(|s| !s.is_empty()))
            .or_else(|| self.server_url.clone())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
    }

    pub fn streaming(&self, no_stream_flag: bool) -> bool {
        !no_stream_flag && self.stream.unwrap_or(true)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_an_error() {
        let path = std::env::temp_dir().join("localchat-missing-config.toml");
        assert!(Config::load_optional(&path).unwrap().is_none());
    }

    #[test]
    fn parses_partial_reconcile_table() {
        let cfg: Config = toml::from_str(
            r#"
            server_url = "http://chat.lan:8000"
            stream = false

            [reconcile]
            max_attempts = 2
            "#,
        )
        .unwrap();

        assert_eq!(cfg.server_url.as_deref(), Some("http://chat.lan:8000"));
        assert!(!cfg.streaming(false));
        assert_eq!(cfg.reconcile.max_attempts, 2);
        assert_eq!(cfg.reconcile.grace(), Duration::from_millis(1000));
        assert_eq!(cfg.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn flags_take_precedence() {
        let cfg = Config {
            server_url: Some("http://from-file".into()),
            ..Config::default()
        };
        assert_eq!(cfg.server_url(Some("http://from-flag")), "http://from-flag");
        assert!(cfg.streaming(false));
        assert!(!cfg.streaming(true));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = std::env::temp_dir().join(format!("localchat-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "request_timeout_secs = 5\n").unwrap();

        let cfg = Config::load_optional(&path).unwrap().unwrap();
        assert_eq!(cfg.request_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.reconcile, ReconcileConfig::default());

        std::fs::remove_dir_all(&dir).ok();
    }
}
