//! Layered settings for the scribe server.
//!
//! Priority, highest first:
//! 1. environment variables (`SCRIBE__` prefix, `__` between sections)
//! 2. `config/{SCRIBE_ENV}.toml`
//! 3. `config/default.toml`
//! 4. built-in defaults

use std::collections::HashMap;
use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

pub use scribe_transcription::{BackupConfig, CorrectionConfig, InferenceConfig, TranscriptionConfig};

const ENV_PREFIX: &str = "SCRIBE";
const PROFILE_VAR: &str = "SCRIBE_ENV";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub correction: CorrectionConfig,
    #[serde(default)]
    pub hotwords: HotwordSettings,
    #[serde(default)]
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub host: String,
    pub port: u16,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5006,
        }
    }
}

impl AppSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "scribe=info,tower_http=info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HotwordSettings {
    /// JSON file shaped `{ "hotwords": [..] }`.
    pub path: Option<String>,
}

impl Settings {
    /// Loads settings relative to the working directory, picking the profile
    /// from `SCRIBE_ENV`.
    pub fn load() -> Result<Self, ConfigError> {
        let profile = std::env::var(PROFILE_VAR).ok();
        Self::load_from(Path::new("."), profile.as_deref(), None)
    }

    /// Loads settings from `<root>/config/`. `env_override` replaces the process
    /// environment as the variable source when given.
    pub fn load_from(
        root: &Path,
        profile: Option<&str>,
        env_override: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let config_dir = root.join("config");

        let mut builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false));

        if let Some(profile) = profile {
            builder = builder.add_source(
                File::from(config_dir.join(format!("{profile}.toml"))).required(false),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(env_override),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.transcription;
        if t.sample_rate == 0 {
            return Err(ConfigError::Message(
                "transcription.sample_rate must be positive".to_string(),
            ));
        }
        if t.vad_window_ms == 0 || t.asr_chunk_ms == 0 {
            return Err(ConfigError::Message(
                "transcription cadence windows must be positive".to_string(),
            ));
        }
        if self.correction.enabled && self.correction.api_url.trim().is_empty() {
            return Err(ConfigError::Message(
                "correction.api_url is required when correction is enabled".to_string(),
            ));
        }
        Ok(())
    }
}
