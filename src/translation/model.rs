//! # MADLAD-400 Translation Model
//!
//! Loads a MADLAD-400 machine translation model (a T5 encoder-decoder covering
//! 400+ languages) and translates with beam search.
//!
//! ## Target language selection:
//! The output language is picked by a token prepended to the source, e.g.
//! `<2es> Hello there`. [`target_token`] builds that token from our two-letter
//! codes. The model reads the source language from the text itself; there is no
//! token for it.
//!
//! ## Weights:
//! The tokenizer ships as `tokenizer.json`. Weights come as a single
//! `model.safetensors` or as shards listed in `model.safetensors.index.json`.

use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::t5;
use hf_hub::api::tokio::Api;
use std::sync::Mutex;
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use super::beam::BeamSearch;
use super::{blank_translation, TranslationResult, Translator};
use crate::config::TranslationConfig;
use crate::device;
use crate::hub;
use crate::languages::LANGUAGE_CODES;
use crate::state::lock_model;

/// Target-language token for a supported two-letter code.
pub fn target_token(code: &str) -> Option<String> {
    LANGUAGE_CODES
        .iter()
        .any(|(_, supported)| *supported == code)
        .then(|| format!("<2{}>", code))
}

/// Encoder input: target token, source text truncated to fit, end-of-sentence.
fn build_source_ids(target_id: u32, text_ids: &[u32], eos_id: u32, max_input_tokens: usize) -> Vec<u32> {
    let limit = max_input_tokens.saturating_sub(2);
    if text_ids.len() > limit {
        debug!(
            "Truncating source text from {} to {} tokens",
            text_ids.len(),
            limit
        );
    }

    let mut ids = Vec::with_capacity(text_ids.len().min(limit) + 2);
    ids.push(target_id);
    ids.extend(text_ids.iter().take(limit));
    ids.push(eos_id);
    ids
}

pub struct MadladTranslator {
    model: Mutex<t5::T5ForConditionalGeneration>,
    config: t5::Config,
    tokenizer: Tokenizer,
    settings: TranslationConfig,
    device: Device,
}

impl MadladTranslator {
    /// Download and load the configured translation model.
    pub async fn load(settings: &TranslationConfig, device: Device, api: &Api) -> Result<Self> {
        info!("Loading translation model {}...", settings.model_repo);
        let start_time = Instant::now();

        let repo = hub::model_repo(api, &settings.model_repo, &settings.revision);
        let config_filename = hub::fetch(&repo, &settings.model_repo, "config.json").await?;
        let tokenizer_filename =
            hub::fetch(&repo, &settings.model_repo, &settings.tokenizer_file).await?;
        let weights_filenames = hub::fetch_weights(&repo, &settings.model_repo).await?;

        let mut config: t5::Config = serde_json::from_reader(
            std::fs::File::open(&config_filename).context("failed to open translation config")?,
        )
        .context("failed to parse translation config")?;
        // Beam search re-runs the decoder over every full prefix
        config.use_cache = false;
        debug!("Translation model config: {:?}", config);

        let tokenizer = Tokenizer::from_file(&tokenizer_filename)
            .map_err(|e| anyhow!("Failed to load translation tokenizer: {}", e))?;

        // SAFETY: safetensors files are memory-mapped read-only
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weights_filenames, DType::F32, &device)? };
        let model = t5::T5ForConditionalGeneration::load(vb, &config)?;

        info!(
            "Translation model loaded in {:.2}s",
            start_time.elapsed().as_secs_f64()
        );

        Ok(Self {
            model: Mutex::new(model),
            config,
            tokenizer,
            settings: settings.clone(),
            device,
        })
    }

    fn encode_source(&self, text: &str, target_code: &str) -> Result<Vec<u32>> {
        let token = target_token(target_code)
            .ok_or_else(|| anyhow!("no target token for language code '{}'", target_code))?;
        let target_id = self
            .tokenizer
            .token_to_id(&token)
            .ok_or_else(|| anyhow!("translation model does not know target token {}", token))?;

        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow!("Tokenizer encode error: {}", e))?;

        Ok(build_source_ids(
            target_id,
            encoding.get_ids(),
            self.config.eos_token_id as u32,
            self.settings.max_input_tokens,
        ))
    }

    /// Encode once, then beam search over the decoder.
    ///
    /// Every step re-runs the decoder over the whole prefix of all live beams as
    /// one batch, so no per-beam KV cache has to be tracked.
    fn generate(&self, model: &mut t5::T5ForConditionalGeneration, source_ids: &[u32]) -> Result<Vec<u32>> {
        model.clear_kv_cache();
        let input = Tensor::new(source_ids, &self.device)?.unsqueeze(0)?;
        let encoder_output = model.encode(&input)?;

        let search = BeamSearch {
            num_beams: self.settings.num_beams,
            max_len: self.settings.max_output_tokens,
            eos_token: self.config.eos_token_id as u32,
            length_penalty: self.settings.length_penalty,
        };
        let pad_token = self.config.pad_token_id;
        let start_token = self
            .config
            .decoder_start_token_id
            .unwrap_or(self.config.pad_token_id) as u32;

        let output = search.search(start_token, |sequences| {
            let batch = sequences.len();
            let seq_len = sequences[0].len();
            let flat: Vec<u32> = sequences.concat();

            let xs = Tensor::from_vec(flat, (batch, seq_len), &self.device)?;
            let encoder_batch = encoder_output.repeat((batch, 1, 1))?;

            model.clear_kv_cache();
            // Logits for the last position only: (batch, vocab)
            let logits = model.decode(&xs, &encoder_batch)?;
            let mut log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?
                .to_dtype(DType::F32)?
                .to_vec2::<f32>()?;

            for row in log_probs.iter_mut() {
                if let Some(lp) = row.get_mut(pad_token) {
                    *lp = f32::NEG_INFINITY;
                }
            }
            Ok(log_probs)
        });

        model.clear_kv_cache();
        output
    }
}

impl Translator for MadladTranslator {
    fn translate(&self, source_text: &str, target_code: &str) -> Result<TranslationResult> {
        if let Some(blank) = blank_translation(source_text) {
            return Ok(blank);
        }

        let start_time = Instant::now();
        info!("Translating {} chars to {}", source_text.len(), target_code);

        let source_ids = self.encode_source(source_text, target_code)?;

        let output_ids = {
            let mut model = lock_model(&self.model);
            self.generate(&mut model, &source_ids)?
        };

        let translated_text = self
            .tokenizer
            .decode(&output_ids, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?
            .trim()
            .to_string();

        info!(
            "Translation completed: {} -> {} tokens in {}ms",
            source_ids.len(),
            output_ids.len(),
            start_time.elapsed().as_millis()
        );

        Ok(TranslationResult { translated_text })
    }

    fn model_name(&self) -> String {
        format!(
            "MADLAD-400 {} (beam search x{}) on {}",
            self.settings.model_repo,
            self.settings.num_beams,
            device::describe(&self.device)
        )
    }
}
