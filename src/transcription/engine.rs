//! # Transcription Engine
//!
//! Owns the loaded Whisper model and exposes it through [`SpeechToText`].
//!
//! ## Thread Safety:
//! Candle's Whisper decoder keeps a KV cache, so a forward pass needs exclusive
//! access. The model sits behind a `Mutex`: concurrent requests queue up on it and
//! are transcribed one at a time. Callers run this on the blocking thread pool so
//! waiting for the lock never stalls the async workers.

use anyhow::Result;
use candle_core::Device;
use hf_hub::api::tokio::Api;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use super::model::{ModelSize, WhisperModel};
use super::{SpeechToText, TranscriptionResult};
use crate::audio;
use crate::config::ModelsConfig;
use crate::device;
use crate::state::lock_model;

pub struct WhisperTranscriber {
    model: Mutex<WhisperModel>,
    description: String,
}

impl WhisperTranscriber {
    /// Download and load the configured Whisper model.
    pub async fn load(config: &ModelsConfig, device: Device, api: &Api) -> Result<Self> {
        let size: ModelSize = config.whisper_model.parse()?;
        let model = WhisperModel::load(
            api,
            size,
            &config.whisper_revision,
            &config.mel_filters_repo,
            device,
        )
        .await?;

        Ok(Self::new(model))
    }

    pub fn new(model: WhisperModel) -> Self {
        let description = format!(
            "Whisper {} ({}) on {}",
            model.size(),
            model.size().repo_name(),
            device::describe(model.device())
        );

        Self {
            model: Mutex::new(model),
            description,
        }
    }
}

impl SpeechToText for WhisperTranscriber {
    fn transcribe(&self, path: &Path) -> Result<TranscriptionResult> {
        let start_time = Instant::now();

        // Decode outside the lock; only inference needs the model.
        let pcm = audio::decode_file(path)?;
        if pcm.is_empty() {
            tracing::info!("Audio file {} has no samples, nothing to transcribe", path.display());
            return Ok(TranscriptionResult::silence());
        }

        let mut model = lock_model(&self.model);
        let result = model.transcribe(&pcm)?;

        tracing::info!(
            "Transcription completed: {:.2}s audio -> {} chars in {}ms (language: {})",
            pcm.len() as f64 / audio::TARGET_SAMPLE_RATE as f64,
            result.text.len(),
            start_time.elapsed().as_millis(),
            result.detected_language
        );

        Ok(result)
    }

    fn model_name(&self) -> String {
        self.description.clone()
    }
}
