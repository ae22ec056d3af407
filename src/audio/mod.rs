//! # Audio Processing Module
//!
//! Turns an uploaded audio file into the input Whisper expects.
//!
//! ## Audio Format Produced:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Samples**: 32-bit float in [-1.0, 1.0]
//! - **Channels**: Mono (multi-channel input is averaged)
//!
//! Container and codec detection is left to symphonia; anything it can probe
//! (WAV, FLAC, MP3, OGG/Vorbis, MP4/AAC, ...) is accepted.

pub mod decoder;

pub use decoder::{decode_file, TARGET_SAMPLE_RATE};
