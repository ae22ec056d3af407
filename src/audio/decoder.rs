//! # Audio Decoder
//!
//! Decodes a compressed or uncompressed audio file to 16kHz mono PCM.
//!
//! ## Process:
//! 1. Probe the container (file extension used as a hint)
//! 2. Decode every packet of the default track, skipping corrupt frames
//! 3. Downmix to mono by averaging channels
//! 4. Resample to 16kHz with a windowed-sinc resampler if needed

use anyhow::{anyhow, Context, Result};
use std::io::Cursor;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Sample rate Whisper models are trained on.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

const RESAMPLE_CHUNK_SIZE: usize = 1024;

/// Read and decode an audio file from disk.
pub fn decode_file(path: &Path) -> Result<Vec<f32>> {
    let data = std::fs::read(path)
        .with_context(|| format!("failed to read audio file {}", path.display()))?;
    let extension = path.extension().and_then(|ext| ext.to_str());

    decode_bytes(&data, extension)
        .with_context(|| format!("failed to decode audio file {}", path.display()))
}

/// Decode in-memory audio data. `extension` is only a hint; the container is
/// sniffed from the data itself.
pub fn decode_bytes(data: &[u8], extension: Option<&str>) -> Result<Vec<f32>> {
    let cursor = Cursor::new(data.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| anyhow!("unsupported audio format: {}", e))?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("no audio track found"))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let source_rate = codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("unknown sample rate"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| anyhow!("unsupported codec: {}", e))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(anyhow!("failed to read packet: {}", e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!(error = %e, "Skipping corrupt audio frame");
                continue;
            }
            Err(e) => return Err(anyhow!("failed to decode packet: {}", e)),
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            continue;
        }

        let channels = spec.channels.count().max(1);
        let mut buffer = SampleBuffer::<f32>::new(frames as u64, spec);
        buffer.copy_interleaved_ref(decoded);

        downmix_into(buffer.samples(), channels, &mut samples);
    }

    if samples.is_empty() {
        // A valid container with no frames is silence, not an error
        tracing::debug!("Audio stream contains no samples");
        return Ok(samples);
    }

    if source_rate != TARGET_SAMPLE_RATE {
        samples = resample(&samples, source_rate, TARGET_SAMPLE_RATE)?;
    }

    tracing::debug!(
        samples = samples.len(),
        duration_secs = samples.len() as f32 / TARGET_SAMPLE_RATE as f32,
        source_rate,
        "Audio decoded to 16kHz mono PCM"
    );

    Ok(samples)
}

/// Average interleaved frames down to a single channel.
fn downmix_into(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels == 1 {
        out.extend_from_slice(interleaved);
        return;
    }

    out.extend(
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK_SIZE, 1)
        .map_err(|e| anyhow!("failed to initialise resampler: {}", e))?;

    let mut output =
        Vec::with_capacity((samples.len() as f64 * ratio) as usize + RESAMPLE_CHUNK_SIZE);

    for chunk in samples.chunks(RESAMPLE_CHUNK_SIZE) {
        let mut input = chunk.to_vec();
        input.resize(RESAMPLE_CHUNK_SIZE, 0.0);

        let result = resampler
            .process(&[input], None)
            .map_err(|e| anyhow!("failed to resample: {}", e))?;

        if let Some(channel) = result.first() {
            output.extend_from_slice(channel);
        }
    }

    // The last chunk was zero-padded; drop what it added.
    let expected_len = (samples.len() as f64 * ratio) as usize;
    output.truncate(expected_len);

    Ok(output)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::io::Write;

    /// Build a 16-bit PCM WAV file from interleaved samples.
    pub(crate) fn wav_bytes(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let block_align = channels * 2;

        let mut out = Vec::with_capacity(44 + data_len as usize);
        out.write_all(b"RIFF").unwrap();
        out.write_u32::<LittleEndian>(36 + data_len).unwrap();
        out.write_all(b"WAVE").unwrap();
        out.write_all(b"fmt ").unwrap();
        out.write_u32::<LittleEndian>(16).unwrap();
        out.write_u16::<LittleEndian>(1).unwrap(); // PCM
        out.write_u16::<LittleEndian>(channels).unwrap();
        out.write_u32::<LittleEndian>(sample_rate).unwrap();
        out.write_u32::<LittleEndian>(sample_rate * block_align as u32).unwrap();
        out.write_u16::<LittleEndian>(block_align).unwrap();
        out.write_u16::<LittleEndian>(16).unwrap();
        out.write_all(b"data").unwrap();
        out.write_u32::<LittleEndian>(data_len).unwrap();
        for s in samples {
            out.write_i16::<LittleEndian>((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                .unwrap();
        }
        out
    }

    pub(crate) fn sine(sample_rate: u32, secs: f32, freq: f32) -> Vec<f32> {
        let n = (sample_rate as f32 * secs) as usize;
        (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_decode_16khz_mono_wav() {
        let wav = wav_bytes(&sine(16_000, 1.0, 440.0), 16_000, 1);
        let pcm = decode_bytes(&wav, Some("wav")).unwrap();

        assert_eq!(pcm.len(), 16_000);
        assert!(pcm.iter().all(|s| (-1.0..=1.0).contains(s)));
        assert!(pcm.iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn test_decode_downmixes_stereo() {
        // Left and right are opposite, so the mono mix is silence.
        let mut interleaved = Vec::new();
        for s in sine(16_000, 0.5, 440.0) {
            interleaved.push(s);
            interleaved.push(-s);
        }
        let wav = wav_bytes(&interleaved, 16_000, 2);
        let pcm = decode_bytes(&wav, None).unwrap();

        assert_eq!(pcm.len(), 8_000);
        assert!(pcm.iter().all(|s| s.abs() < 1e-3));
    }

    #[test]
    fn test_decode_resamples_to_16khz() {
        let wav = wav_bytes(&sine(8_000, 1.0, 300.0), 8_000, 1);
        let pcm = decode_bytes(&wav, Some("wav")).unwrap();

        // One second of audio stays one second long.
        assert!(pcm.len() <= 16_000);
        assert!(pcm.len() > 15_000, "got {} samples", pcm.len());
    }

    #[test]
    fn test_empty_wav_decodes_to_no_samples() {
        let samples = decode_bytes(&wav_bytes(&[], 16_000, 1), Some("wav")).unwrap();
        assert!(samples.is_empty());

        let samples = decode_bytes(&wav_bytes(&[], 44_100, 2), Some("wav")).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = decode_bytes(b"definitely not audio", Some("wav"));
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_file_reports_missing_file() {
        let err = decode_file(Path::new("/nonexistent/clip.wav")).unwrap_err();
        assert!(format!("{:#}", err).contains("failed to read audio file"));
    }

    #[test]
    fn test_downmix_averages_frames() {
        let mut out = Vec::new();
        downmix_into(&[1.0, 0.0, 0.5, 0.5], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5]);
    }
}
