//! # Transcription Module
//!
//! Speech-to-text using Whisper models via the Candle-rs framework.
//!
//! ## Key Components:
//! - **SpeechToText**: the contract the request handler depends on
//! - **WhisperModel**: model download, mel features, language detection, greedy decoding
//! - **WhisperTranscriber**: thread-safe wrapper that owns a loaded model
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB, good balance (default)
//! - **small**: ~244MB, better accuracy
//! - **medium**: ~769MB, handles technical vocabulary
//! - **large**: ~1550MB, best accuracy but slowest

pub mod engine;
pub mod model;

use anyhow::Result;
use std::path::Path;

pub use engine::WhisperTranscriber;

/// Language tag reported when the model could not tell.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// Result of transcribing one audio file.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    /// The transcribed text; empty for silent or unintelligible audio
    pub text: String,

    /// Whisper language tag ("en", "de", ...) or [`UNKNOWN_LANGUAGE`]
    pub detected_language: String,
}

impl TranscriptionResult {
    /// Result for audio that contains no samples at all.
    pub fn silence() -> Self {
        Self {
            text: String::new(),
            detected_language: UNKNOWN_LANGUAGE.to_string(),
        }
    }
}

/// Speech-to-text backend.
///
/// Implementations are shared between requests behind an `Arc`, and are called
/// from the blocking thread pool, so they may take as long as inference takes.
pub trait SpeechToText: Send + Sync {
    /// Transcribe the audio file at `path`.
    fn transcribe(&self, path: &Path) -> Result<TranscriptionResult>;

    /// Human-readable description of the loaded model.
    fn model_name(&self) -> String;
}
