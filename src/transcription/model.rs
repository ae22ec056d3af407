//! # Whisper Model Management
//!
//! Handles loading a Whisper model with Candle-rs and running it over PCM audio.
//!
//! ## Model Loading Process:
//! 1. Download config, tokenizer and weights from HuggingFace (cached locally)
//! 2. Download the precomputed mel filter bank matching the model's mel bin count
//! 3. Initialize model on the selected device (CPU/GPU)
//! 4. Look up the special tokens (start, end, task, language) in the tokenizer
//!
//! ## Inference:
//! Audio is processed in 30 second windows. The language is detected on the first
//! window and then used as the decoding prompt for every window. Decoding is
//! greedy, so the same audio always yields the same text.

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use hf_hub::api::tokio::Api;
use tokenizers::Tokenizer;

use super::{TranscriptionResult, UNKNOWN_LANGUAGE};
use crate::hub;

/// Language codes Whisper knows, in the model's token order.
const LANGUAGES: [&str; 99] = [
    "en", "zh", "de", "es", "ru", "ko", "fr", "ja", "pt", "tr", "pl", "ca", "nl", "ar", "sv",
    "it", "id", "hi", "fi", "vi", "he", "uk", "el", "ms", "cs", "ro", "da", "hu", "ta", "no",
    "th", "ur", "hr", "bg", "lt", "la", "mi", "ml", "cy", "sk", "te", "fa", "lv", "bn", "sr",
    "az", "sl", "kn", "et", "mk", "br", "eu", "is", "hy", "ne", "mn", "bs", "kk", "sq", "sw",
    "gl", "mr", "pa", "si", "km", "sn", "yo", "so", "af", "oc", "ka", "be", "tg", "sd", "gu",
    "am", "yi", "lo", "uz", "fo", "ht", "ps", "tk", "nn", "mt", "sa", "lb", "my", "bo", "tl",
    "mg", "as", "tt", "haw", "ln", "ha", "ba", "jw", "su",
];

/// Available Whisper model sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// Get the HuggingFace model repository name.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// Special token ids looked up once at load time.
#[derive(Debug, Clone)]
struct SpecialTokens {
    sot: u32,
    eot: u32,
    transcribe: u32,
    no_timestamps: u32,
    /// (language code, token id) for every language token the tokenizer has
    languages: Vec<(&'static str, u32)>,
}

impl SpecialTokens {
    fn from_tokenizer(tokenizer: &Tokenizer) -> Result<Self> {
        let id = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| anyhow!("token not found in tokenizer: {}", token))
        };

        let languages = LANGUAGES
            .iter()
            .filter_map(|lang| {
                tokenizer
                    .token_to_id(&format!("<|{}|>", lang))
                    .map(|token| (*lang, token))
            })
            .collect();

        Ok(Self {
            sot: id(m::SOT_TOKEN)?,
            eot: id(m::EOT_TOKEN)?,
            transcribe: id(m::TRANSCRIBE_TOKEN)?,
            no_timestamps: id(m::NO_TIMESTAMPS_TOKEN)?,
            languages,
        })
    }
}

/// A loaded Whisper model ready for transcription.
///
/// ## Thread Safety:
/// Forward passes mutate the decoder's KV cache, so every method takes
/// `&mut self`; [`super::WhisperTranscriber`] puts the model behind a mutex.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    size: ModelSize,
    tokenizer: Tokenizer,
    tokens: SpecialTokens,
    /// Mel filter bank, `num_mel_bins x (N_FFT / 2 + 1)`
    mel_filters: Vec<f32>,
    /// Additive logit mask: `-inf` for tokens that must never be sampled
    suppress_tokens: Tensor,
}

impl WhisperModel {
    /// Load a Whisper model from HuggingFace.
    ///
    /// ## Parameters:
    /// - **size**: Which model size to load
    /// - **revision**: Hub revision of the model repository
    /// - **mel_filters_repo**: Repository hosting `melfilters.bytes` / `melfilters128.bytes`
    /// - **device**: Device to load model on (CPU/GPU)
    pub async fn load(
        api: &Api,
        size: ModelSize,
        revision: &str,
        mel_filters_repo: &str,
        device: Device,
    ) -> Result<Self> {
        tracing::info!("Loading Whisper {} model...", size);
        let start_time = std::time::Instant::now();

        let repo_id = size.repo_name();
        let repo = hub::model_repo(api, repo_id, revision);

        let config_filename = hub::fetch(&repo, repo_id, "config.json").await?;
        let tokenizer_filename = hub::fetch(&repo, repo_id, "tokenizer.json").await?;
        let model_filename = hub::fetch(&repo, repo_id, "model.safetensors").await?;

        let config: Config = serde_json::from_reader(
            std::fs::File::open(&config_filename).context("failed to open whisper config")?,
        )
        .context("failed to parse whisper config")?;
        tracing::debug!("Model config: {:?}", config);

        let tokenizer = Tokenizer::from_file(&tokenizer_filename)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        let tokens = SpecialTokens::from_tokenizer(&tokenizer)?;

        let mel_file = mel_filters_file(config.num_mel_bins)?;
        let mel_repo = hub::model_repo(api, mel_filters_repo, "main");
        let mel_bytes = std::fs::read(hub::fetch(&mel_repo, mel_filters_repo, mel_file).await?)
            .context("failed to read mel filters")?;
        let mel_filters = read_mel_filters(&mel_bytes, config.num_mel_bins)?;

        let suppress_tokens = suppress_mask(&config, tokens.no_timestamps, &device)?;

        // SAFETY: safetensors files are memory-mapped read-only
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[model_filename], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        tracing::info!(
            "Whisper {} model loaded in {:.2}s ({} language tokens)",
            size,
            start_time.elapsed().as_secs_f64(),
            tokens.languages.len()
        );

        Ok(Self {
            model,
            config,
            device,
            size,
            tokenizer,
            tokens,
            mel_filters,
            suppress_tokens,
        })
    }

    pub fn size(&self) -> ModelSize {
        self.size
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Transcribe 16kHz mono PCM audio.
    ///
    /// ## Audio Requirements:
    /// - Sample rate: 16kHz
    /// - Format: 32-bit float, range [-1.0, 1.0]
    /// - Channels: Mono (single channel)
    pub fn transcribe(&mut self, pcm: &[f32]) -> Result<TranscriptionResult> {
        if pcm.is_empty() {
            return Ok(TranscriptionResult::silence());
        }

        let start_time = std::time::Instant::now();
        let mut language: Option<(&'static str, u32)> = None;
        let mut segments: Vec<String> = Vec::new();

        for (i, chunk) in pcm.chunks(m::N_SAMPLES).enumerate() {
            let mel = self.mel_spectrogram(chunk)?;
            let audio_features = self.model.encoder.forward(&mel, true)?;

            if i == 0 {
                language = self.detect_language(&audio_features)?;
                tracing::debug!("Detected language: {:?}", language.map(|(code, _)| code));
            }

            let text = self.decode_segment(&audio_features, language.map(|(_, token)| token))?;
            tracing::debug!(segment = i, "Segment transcript: '{}'", text);
            if !text.is_empty() {
                segments.push(text);
            }
        }

        self.model.reset_kv_cache();

        let text = segments.join(" ");
        tracing::info!(
            "Transcribed {:.2}s of audio in {:.2}s ({} chars)",
            pcm.len() as f64 / m::SAMPLE_RATE as f64,
            start_time.elapsed().as_secs_f64(),
            text.len()
        );

        Ok(TranscriptionResult {
            text,
            detected_language: language
                .map(|(code, _)| code.to_string())
                .unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string()),
        })
    }

    /// Log-mel features for one window, zero-padded to 30 seconds.
    fn mel_spectrogram(&self, chunk: &[f32]) -> Result<Tensor> {
        let mut samples = chunk.to_vec();
        samples.resize(m::N_SAMPLES, 0.0);

        let mel = m::audio::pcm_to_mel(&self.config, &samples, &self.mel_filters);
        let n_mels = self.config.num_mel_bins;
        let n_frames = mel.len() / n_mels;

        let mel = Tensor::from_vec(mel, (1, n_mels, n_frames), &self.device)?;
        if n_frames > m::N_FRAMES {
            Ok(mel.narrow(2, 0, m::N_FRAMES)?)
        } else {
            Ok(mel)
        }
    }

    /// Pick the most likely language token after the start-of-transcript token.
    fn detect_language(&mut self, audio_features: &Tensor) -> Result<Option<(&'static str, u32)>> {
        if self.tokens.languages.is_empty() {
            return Ok(None);
        }

        let tokens = Tensor::new(&[[self.tokens.sot]], &self.device)?;
        let ys = self.model.decoder.forward(&tokens, audio_features, true)?;
        let logits = self.model.decoder.final_linear(&ys.i(..1)?)?.i(0)?.i(0)?;

        let ids: Vec<u32> = self.tokens.languages.iter().map(|(_, id)| *id).collect();
        let ids = Tensor::new(ids.as_slice(), &self.device)?;
        let logits = logits.index_select(&ids, 0)?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?.to_vec1::<f32>()?;

        Ok(probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| self.tokens.languages[i]))
    }

    /// Greedy decoding of one window.
    fn decode_segment(&mut self, audio_features: &Tensor, language: Option<u32>) -> Result<String> {
        let mut tokens = vec![self.tokens.sot];
        if let Some(language) = language {
            tokens.push(language);
        }
        tokens.push(self.tokens.transcribe);
        tokens.push(self.tokens.no_timestamps);
        let prompt_len = tokens.len();

        let max_len = self.config.max_target_positions;
        for i in 0..max_len / 2 {
            let tokens_t = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&tokens_t, audio_features, i == 0)?;

            let (_, seq_len, _) = ys.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let logits = logits.broadcast_add(&self.suppress_tokens)?;
            let next_token = logits.argmax(D::Minus1)?.to_scalar::<u32>()?;

            if next_token == self.tokens.eot || tokens.len() >= max_len {
                break;
            }
            tokens.push(next_token);
        }

        let text = self
            .tokenizer
            .decode(&tokens[prompt_len..], true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;

        Ok(text.trim().to_string())
    }
}

/// Name of the precomputed filter bank for a mel bin count.
fn mel_filters_file(num_mel_bins: usize) -> Result<&'static str> {
    match num_mel_bins {
        80 => Ok("melfilters.bytes"),
        128 => Ok("melfilters128.bytes"),
        n => Err(anyhow!("unsupported number of mel bins: {}", n)),
    }
}

/// Decode little-endian f32 filter weights.
fn read_mel_filters(bytes: &[u8], num_mel_bins: usize) -> Result<Vec<f32>> {
    let expected_len = num_mel_bins * (m::N_FFT / 2 + 1);
    if bytes.len() < expected_len * 4 {
        return Err(anyhow!(
            "mel filters file too small: {} bytes, expected at least {}",
            bytes.len(),
            expected_len * 4
        ));
    }

    let mut filters = vec![0f32; expected_len];
    LittleEndian::read_f32_into(&bytes[..expected_len * 4], &mut filters);
    Ok(filters)
}

/// Additive mask over the vocabulary: the model config's suppress list and the
/// no-timestamps token (we never want it in the output) get `-inf`.
fn suppress_mask(config: &Config, no_timestamps: u32, device: &Device) -> Result<Tensor> {
    let mask: Vec<f32> = (0..config.vocab_size as u32)
        .map(|i| {
            if config.suppress_tokens.contains(&i) || i == no_timestamps {
                f32::NEG_INFINITY
            } else {
                0.0
            }
        })
        .collect();
    Ok(Tensor::new(mask.as_slice(), device)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    #[test]
    fn test_model_size_parsing() {
        assert_eq!("base".parse::<ModelSize>().unwrap(), ModelSize::Base);
        assert_eq!("LARGE".parse::<ModelSize>().unwrap(), ModelSize::Large);
        assert!("invalid".parse::<ModelSize>().is_err());
    }

    #[test]
    fn test_model_size_round_trips_through_display() {
        for size in [ModelSize::Tiny, ModelSize::Base, ModelSize::Small, ModelSize::Medium, ModelSize::Large] {
            assert_eq!(size.to_string().parse::<ModelSize>().unwrap(), size);
            assert!(size.repo_name().starts_with("openai/whisper-"));
        }
    }

    #[test]
    fn test_mel_filters_file() {
        assert_eq!(mel_filters_file(80).unwrap(), "melfilters.bytes");
        assert_eq!(mel_filters_file(128).unwrap(), "melfilters128.bytes");
        assert!(mel_filters_file(64).is_err());
    }

    #[test]
    fn test_read_mel_filters() {
        let expected_len = 80 * (m::N_FFT / 2 + 1);
        let mut bytes = Vec::new();
        for i in 0..expected_len {
            bytes.write_f32::<LittleEndian>(i as f32 * 0.5).unwrap();
        }

        let filters = read_mel_filters(&bytes, 80).unwrap();
        assert_eq!(filters.len(), expected_len);
        assert_eq!(filters[3], 1.5);

        assert!(read_mel_filters(&bytes[..100], 80).is_err());
    }

    #[test]
    fn test_language_table_has_no_duplicates() {
        let unique: std::collections::HashSet<_> = LANGUAGES.iter().collect();
        assert_eq!(unique.len(), LANGUAGES.len());
        assert_eq!(LANGUAGES[0], "en");
    }
}
