//! # Translation Module
//!
//! Translates transcripts with a multilingual MADLAD-400 model via Candle-rs.
//!
//! ## Key Components:
//! - **Translator**: the contract the request handler depends on
//! - **BeamSearch**: deterministic beam search over any step function
//! - **MadladTranslator**: model download, source truncation, target-token prompting
//!
//! ## Source language:
//! The model works out the source language from the text. Whisper's detected
//! language is reported to the client but never passed to the translator.

pub mod beam;
pub mod model;

use anyhow::Result;

pub use model::MadladTranslator;

/// Result of translating one transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationResult {
    pub translated_text: String,
}

/// Translation of text with nothing to translate.
///
/// Empty or whitespace-only input gives an empty translation without touching
/// the model; anything else returns `None`.
pub fn blank_translation(source_text: &str) -> Option<TranslationResult> {
    source_text.trim().is_empty().then(|| TranslationResult {
        translated_text: String::new(),
    })
}

/// Text-to-text translation backend.
///
/// Failures are reported through `Err`; an `Ok` value is always a real
/// translation.
pub trait Translator: Send + Sync {
    /// Translate `source_text` into the language with two-letter code `target_code`.
    fn translate(&self, source_text: &str, target_code: &str) -> Result<TranslationResult>;

    /// Human-readable description of the loaded model.
    fn model_name(&self) -> String;
}
