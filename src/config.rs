//! Configuration loading (C9). A TOML file plus CLI overrides are folded into
//! one read-only [`ServerConfig`], then wrapped in an `Arc<ServerContext>` for
//! the rest of the server to share.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::engine::model_cache::ModelCache;

#[derive(Debug, Parser)]
#[command(name = "stt-server", about = "Real-time speech-to-text server")]
pub struct Cli {
    /// Path to the TOML settings file.
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Override the WebSocket listen port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Override the default engine name ("vosk", "whisper", or "dynamic").
    #[arg(long)]
    pub engine: Option<String>,

    /// Run with a single model path, bypassing the configured model table.
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Override the recordings directory (used by the wave_file_writer dev engine).
    #[arg(long)]
    pub recordings: Option<PathBuf>,

    /// Override the log level ("error", "warn", "info", "debug", "trace").
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    pub path: String,
    pub lang: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub scorer: Option<String>,
    #[serde(default)]
    pub beamsize: Option<u32>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub translate: bool,
    #[serde(default)]
    pub compute_device: Option<String>,
    #[serde(default)]
    pub compute_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub common_token: Option<String>,
    #[serde(default)]
    pub user_tokens: HashMap<String, String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            common_token: None,
            user_tokens: HashMap::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_heartbeat_delay() -> u64 {
    10
}
fn default_timeout_seconds() -> u64 {
    15
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_engine() -> String {
    "dynamic".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// HTTP surface port. Defaults to the WebSocket port + 1 when unset.
    #[serde(default)]
    pub http_port: Option<u16>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_heartbeat_delay")]
    pub heartbeat_delay: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default = "default_recordings_path")]
    pub recordings_path: PathBuf,
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default)]
    pub models: Vec<ModelEntry>,
    #[serde(default)]
    pub speaker_models: Vec<String>,
    #[serde(default)]
    pub model_cache_capacity: Option<usize>,
}

/// `~/.local/share/stt-server/recordings` (or the platform equivalent) when
/// a data directory is resolvable, else a path relative to the working
/// directory.
fn default_recordings_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("stt-server").join("recordings"))
        .unwrap_or_else(|| PathBuf::from("./recordings"))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            http_port: None,
            log_level: default_log_level(),
            heartbeat_delay: default_heartbeat_delay(),
            timeout_seconds: default_timeout_seconds(),
            auth: AuthConfig::default(),
            recordings_path: default_recordings_path(),
            engine: default_engine(),
            models: Vec::new(),
            speaker_models: Vec::new(),
            model_cache_capacity: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no models configured")]
    NoModels,
    #[error("model path does not exist: {0}")]
    MissingModelPath(String),
}

impl ServerConfig {
    /// Loads the base config from `path` if given, then applies CLI overrides.
    /// Mirrors the original system's low-to-high priority search: bundled
    /// defaults < settings file < CLI flags.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.settings {
            Some(path) => Self::from_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(port) = cli.port {
            config.port = port;
        }
        if let Some(engine) = &cli.engine {
            config.engine = engine.clone();
        }
        if let Some(recordings) = &cli.recordings {
            config.recordings_path = recordings.clone();
        }
        if let Some(log_level) = &cli.log_level {
            config.log_level = log_level.clone();
        }
        if let Some(model_path) = &cli.model {
            config.models = vec![ModelEntry {
                path: model_path.to_string_lossy().into_owned(),
                lang: "en-US".to_string(),
                name: None,
                engine: None,
                task: None,
                scorer: None,
                beamsize: None,
                prompt: None,
                translate: false,
                compute_device: None,
                compute_type: None,
            }];
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.models.is_empty() {
            return Err(ConfigError::NoModels);
        }
        for model in &self.models {
            if !Path::new(&model.path).exists() {
                return Err(ConfigError::MissingModelPath(model.path.clone()));
            }
        }
        Ok(())
    }
}

/// The single read-only object shared (via `Arc`) by every session. Built
/// once in `main()`; nothing under it mutates afterward except the model
/// cache's own interior `in_use` flags.
pub struct ServerContext {
    pub config: ServerConfig,
    pub model_cache: ModelCache,
}

impl ServerContext {
    pub fn new(config: ServerConfig) -> Self {
        let capacity = config
            .model_cache_capacity
            .unwrap_or_else(|| (config.models.len() * 2).max(1));
        let model_cache = ModelCache::new(capacity);
        Self {
            config,
            model_cache,
        }
    }

    /// The HTTP surface's listen address: same host, `http_port` if set,
    /// otherwise the WebSocket port + 1.
    pub fn http_addr(&self) -> String {
        let port = self.config.http_port.unwrap_or(self.config.port + 1);
        format!("{}:{}", self.config.host, port)
    }

    pub fn distinct_languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self
            .config
            .models
            .iter()
            .map(|m| m.lang.clone())
            .collect();
        langs.sort();
        langs.dedup();
        langs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(settings: Option<PathBuf>) -> Cli {
        Cli {
            settings,
            port: None,
            engine: None,
            model: None,
            recordings: None,
            log_level: None,
        }
    }

    #[test]
    fn rejects_config_with_no_models() {
        let dir = tempfile::tempdir().unwrap();
        let settings_path = dir.path().join("settings.toml");
        std::fs::write(&settings_path, "port = 9000\n").unwrap();

        let err = ServerConfig::load(&cli(Some(settings_path))).unwrap_err();
        assert!(matches!(err, ConfigError::NoModels));
    }

    #[test]
    fn rejects_config_with_missing_model_path() {
        let dir = tempfile::tempdir().unwrap();
        let settings_path = dir.path().join("settings.toml");
        std::fs::write(
            &settings_path,
            r#"
            [[models]]
            path = "/does/not/exist.bin"
            lang = "en-US"
            "#,
        )
        .unwrap();

        let err = ServerConfig::load(&cli(Some(settings_path))).unwrap_err();
        assert!(matches!(err, ConfigError::MissingModelPath(_)));
    }

    #[test]
    fn loads_valid_config_and_applies_cli_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.bin");
        std::fs::File::create(&model_path)
            .unwrap()
            .write_all(b"stub")
            .unwrap();

        let settings_path = dir.path().join("settings.toml");
        std::fs::write(
            &settings_path,
            format!(
                r#"
                port = 9000
                engine = "vosk"

                [[models]]
                path = "{}"
                lang = "en-US"
                "#,
                model_path.display()
            ),
        )
        .unwrap();

        let mut request = cli(Some(settings_path));
        request.port = Some(9100);

        let config = ServerConfig::load(&request).unwrap();
        assert_eq!(config.port, 9100, "CLI override must win over the file");
        assert_eq!(config.engine, "vosk");
        assert_eq!(config.models.len(), 1);
    }

    #[test]
    fn cli_model_override_bypasses_configured_table() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("override.bin");
        std::fs::File::create(&model_path)
            .unwrap()
            .write_all(b"stub")
            .unwrap();

        let mut request = cli(None);
        request.model = Some(model_path.clone());

        let config = ServerConfig::load(&request).unwrap();
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.models[0].path, model_path.to_string_lossy());
    }
}
