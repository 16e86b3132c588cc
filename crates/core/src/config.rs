use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Bearer token required on `/v1/*` routes. Empty or absent = open access.
    #[serde(default)]
    pub api_token: Option<String>,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8765
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            api_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Executables tried before the platform well-known install paths.
    #[serde(default)]
    pub executables: Vec<String>,
    /// Debugging endpoint of an already running browser
    /// (e.g. "http://127.0.0.1:9222"). When set, nothing is launched.
    #[serde(default)]
    pub attach_url: Option<String>,
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub profile_root: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    20
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executables: Vec::new(),
            attach_url: None,
            headless: false,
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            profile_root: None,
            extra_args: Vec::new(),
        }
    }
}

impl BrowserConfig {
    pub fn profile_root(&self, paths: &Paths) -> PathBuf {
        match self.profile_root.as_deref().map(str::trim) {
            Some(root) if !root.is_empty() => PathBuf::from(root),
            _ => paths.default_profile_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Base URL of the automation engine service.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: String,
    /// Environment variable consulted when `api_key` is empty.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_engine_model")]
    pub model: String,
    /// Upper bound on a single engine run. Zero disables the limit.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_engine_model() -> String {
    "gemini-2.0-flash-exp".to_string()
}

fn default_run_timeout_secs() -> u64 {
    1800
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: String::new(),
            api_key_env: default_api_key_env(),
            model: default_engine_model(),
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

impl EngineConfig {
    /// The configured key, falling back to `api_key_env`.
    pub fn resolved_api_key(&self) -> Option<String> {
        let key = self.api_key.trim();
        if !key.is_empty() {
            return Some(key.to_string());
        }
        if self.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.api_key_env)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn endpoint(&self) -> Option<String> {
        self.endpoint
            .as_deref()
            .map(|e| e.trim().trim_end_matches('/'))
            .filter(|e| !e.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobsConfig {
    /// Per-job progress channel capacity.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Terminal jobs older than this are purged from the registry.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_event_buffer() -> usize {
    64
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn api_token(&self) -> Option<String> {
        self.server
            .api_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 8765);
        assert_eq!(cfg.browser.poll_interval_ms, 1000);
        assert_eq!(cfg.browser.max_attempts, 20);
        assert_eq!(cfg.engine.run_timeout_secs, 1800);
        assert_eq!(cfg.jobs.event_buffer, 64);
    }

    #[test]
    fn test_partial_camel_case() {
        let raw = r#"{
  "server": { "port": 9000, "apiToken": "  " },
  "browser": { "maxAttempts": 5, "attachUrl": "http://127.0.0.1:9222" },
  "engine": { "endpoint": "http://localhost:8800/", "apiKey": "k" }
}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.api_token(), None);
        assert_eq!(cfg.browser.max_attempts, 5);
        assert_eq!(cfg.browser.poll_interval_ms, 1000);
        assert_eq!(cfg.engine.endpoint().as_deref(), Some("http://localhost:8800"));
        assert_eq!(cfg.engine.resolved_api_key().as_deref(), Some("k"));
    }

    #[test]
    fn test_api_key_env_fallback() {
        let cfg = EngineConfig {
            api_key_env: "FORMPILOT_TEST_KEY_FALLBACK".to_string(),
            ..Default::default()
        };
        std::env::remove_var("FORMPILOT_TEST_KEY_FALLBACK");
        assert_eq!(cfg.resolved_api_key(), None);
        std::env::set_var("FORMPILOT_TEST_KEY_FALLBACK", "from-env");
        assert_eq!(cfg.resolved_api_key().as_deref(), Some("from-env"));
        std::env::remove_var("FORMPILOT_TEST_KEY_FALLBACK");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let mut cfg = Config::default();
        cfg.server.port = 9100;
        cfg.save(&paths.config_file()).unwrap();
        let loaded = Config::load_or_default(&paths).unwrap();
        assert_eq!(loaded.server.port, 9100);
    }

    #[test]
    fn test_profile_root_override() {
        let paths = Paths::with_base(PathBuf::from("/tmp/fp"));
        let mut browser = BrowserConfig::default();
        assert_eq!(browser.profile_root(&paths), paths.default_profile_root());
        browser.profile_root = Some("/var/tmp/profiles".to_string());
        assert_eq!(browser.profile_root(&paths), PathBuf::from("/var/tmp/profiles"));
    }
}
