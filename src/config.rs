//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms set these)
//! 2. Environment variables (APP_SERVER__PORT, APP_UPLOAD__DIR, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys are separated by a double underscore so that field names which
//! contain underscores (`max_file_size_mb`) survive the mapping:
//! `APP_UPLOAD__MAX_FILE_SIZE_MB=10` becomes `upload.max_file_size_mb`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::device::DevicePreference;
use crate::transcription::model::ModelSize;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each section maps to one part of the pipeline (listener, speech model,
/// translation model, scratch uploads), so a `config.toml` reads the same way
/// the request flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub translation: TranslationConfig,
    pub upload: UploadConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Speech-to-text model settings.
///
/// ## Fields:
/// - `whisper_model`: Which Whisper model to use ("tiny", "base", "small", "medium", "large")
/// - `whisper_revision`: Hub revision (branch, tag or PR ref) to download weights from
/// - `mel_filters_repo`: Hub repository hosting the precomputed `melfilters.bytes` files
/// - `device`: Compute device preference ("auto", "cpu", "cuda", "metal")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub whisper_model: String,
    pub whisper_revision: String,
    pub mel_filters_repo: String,
    pub device: String,
}

/// Translation model and decoding settings.
///
/// ## Decoding:
/// `num_beams`, `length_penalty` and the token limits control the beam search.
/// There is no sampling knob: the same transcript always produces the
/// same translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// Multilingual MADLAD-400 (T5) model repository
    pub model_repo: String,
    pub revision: String,
    /// SentencePiece tokenizer in `tokenizer.json` format, read from `model_repo`
    pub tokenizer_file: String,
    pub max_input_tokens: usize,
    pub max_output_tokens: usize,
    pub num_beams: usize,
    pub length_penalty: f32,
}

/// Scratch upload settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory where uploads live while a request is being processed
    pub dir: PathBuf,
    pub max_file_size_mb: usize,
}

impl UploadConfig {
    /// Upload limit in bytes.
    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// The service starts with no configuration file at all: it listens on port
/// 5000, keeps uploads in `./uploads` and uses Whisper "base" with the
/// MADLAD-400 3B translation model. Both repositories ship `tokenizer.json`
/// and safetensors weights.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
            },
            models: ModelsConfig {
                whisper_model: "base".to_string(),
                whisper_revision: "main".to_string(),
                mel_filters_repo: "FL33TW00D-HF/whisper-base".to_string(),
                device: "auto".to_string(),
            },
            translation: TranslationConfig {
                model_repo: "jbochi/madlad400-3b-mt".to_string(),
                revision: "main".to_string(),
                tokenizer_file: "tokenizer.json".to_string(),
                max_input_tokens: 512,
                max_output_tokens: 512,
                num_beams: 5,
                length_penalty: 1.0,
            },
            upload: UploadConfig {
                dir: PathBuf::from("uploads"),
                max_file_size_mb: 50,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=8080`: Override server port
    /// - `APP_MODELS__WHISPER_MODEL=small`: Override whisper model
    /// - `APP_TRANSLATION__NUM_BEAMS=4`: Override beam width
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        Self::load_from(config::File::with_name("config").required(false))
    }

    fn load_from<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## Why validate:
    /// Model loading takes a long time; a typo in the model size should fail
    /// before the download starts, not after.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        self.models.whisper_model.parse::<ModelSize>()?;
        self.models
            .device
            .parse::<DevicePreference>()
            .map_err(|e| anyhow::anyhow!(e))?;

        if self.upload.dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Upload directory cannot be empty"));
        }

        if self.upload.max_file_size_mb == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.translation.num_beams == 0 {
            return Err(anyhow::anyhow!("Number of beams must be greater than 0"));
        }

        // Room for the target-language token and the end-of-sentence token.
        if self.translation.max_input_tokens < 3 {
            return Err(anyhow::anyhow!("Max input tokens must be at least 3"));
        }

        if self.translation.max_output_tokens == 0 {
            return Err(anyhow::anyhow!("Max output tokens must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(toml: &str) -> Result<AppConfig> {
        AppConfig::load_from(config::File::from_str(toml, FileFormat::Toml))
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.models.whisper_model, "base");
        assert_eq!(config.translation.num_beams, 5);
        assert_eq!(config.translation.max_input_tokens, 512);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.whisper_model = "enormous".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.translation.num_beams = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.upload.max_file_size_mb = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.device = "tpu".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.device = "CPU".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let config = from_toml(
            r#"
            [upload]
            dir = "/tmp/scratch"

            [translation]
            num_beams = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.upload.dir, PathBuf::from("/tmp/scratch"));
        assert_eq!(config.translation.num_beams, 3);
        // Untouched sections keep their defaults
        assert_eq!(config.upload.max_file_size_mb, 50);
        assert_eq!(config.models.whisper_model, "base");
    }

    #[test]
    fn test_default_model_repositories() {
        let config = AppConfig::default();

        assert_eq!(config.models.whisper_model, "base");
        assert_eq!(config.models.whisper_revision, "main");
        assert_eq!(config.models.mel_filters_repo, "FL33TW00D-HF/whisper-base");

        assert_eq!(config.translation.model_repo, "jbochi/madlad400-3b-mt");
        assert_eq!(config.translation.revision, "main");
        assert_eq!(config.translation.tokenizer_file, "tokenizer.json");
    }

    #[test]
    fn test_translation_tokenizer_can_be_overridden() {
        let config = from_toml(
            r#"
            [translation]
            model_repo = "acme/madlad400-10b-mt"
            tokenizer_file = "spm/tokenizer.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.translation.model_repo, "acme/madlad400-10b-mt");
        assert_eq!(config.translation.tokenizer_file, "spm/tokenizer.json");
        assert_eq!(config.translation.revision, "main");
    }

    #[test]
    fn test_max_file_size_bytes() {
        let config = AppConfig::default();
        assert_eq!(config.upload.max_file_size_bytes(), 50 * 1024 * 1024);
    }
}
