//! # Audio Container Decoding
//!
//! Turns whatever the client uploaded (WAV, MP3, M4A/AAC, FLAC, OGG/Vorbis)
//! into the 16 kHz mono `f32` PCM Whisper consumes.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Sample rate every Whisper checkpoint expects
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

const RESAMPLE_CHUNK: usize = 1024;

/// Decode the audio file at `path` to 16 kHz mono PCM in `[-1.0, 1.0]`.
///
/// The file extension, when present, is passed to the prober as a hint.
/// Frames the codec cannot decode are skipped with a warning.
pub fn decode_to_mono_16k(path: &Path) -> Result<Vec<f32>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| anyhow!("Unsupported or corrupt audio: {}", e))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("No audio track found"))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let source_rate = codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("Audio track has no sample rate"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| anyhow!("Unsupported codec: {}", e))?;

    let mut mono: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(anyhow!("Failed to read audio packet: {}", e)),
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
            Err(e) => return Err(anyhow!("Failed to decode audio: {}", e)),
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            continue;
        }

        let mut buffer = SampleBuffer::<f32>::new(frames as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        downmix_into(buffer.samples(), spec.channels.count(), &mut mono);
    }

    if mono.is_empty() {
        return Err(anyhow!("No audio samples decoded"));
    }

    let pcm = if source_rate == TARGET_SAMPLE_RATE {
        mono
    } else {
        resample(&mono, source_rate, TARGET_SAMPLE_RATE)?
    };

    tracing::debug!(
        source_rate,
        samples = pcm.len(),
        duration_secs = pcm.len() as f32 / TARGET_SAMPLE_RATE as f32,
        "Audio decoded to 16kHz mono PCM"
    );
    Ok(pcm)
}

/// Average interleaved frames down to one channel.
fn downmix_into(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels <= 1 {
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
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| anyhow!("Failed to create resampler: {}", e))?;

    let expected_len = (samples.len() as f64 * ratio) as usize;
    // The sinc filter delays its output; those leading frames are padding
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(delay + expected_len + RESAMPLE_CHUNK);

    let mut chunks = samples.chunks(RESAMPLE_CHUNK);
    while output.len() < delay + expected_len {
        // Past the end of the input, zeros flush the filter tail
        let mut input = chunks.next().map(<[f32]>::to_vec).unwrap_or_default();
        input.resize(RESAMPLE_CHUNK, 0.0);

        let result = resampler
            .process(&[input], None)
            .map_err(|e| anyhow!("Resampling failed: {}", e))?;
        match result.first() {
            Some(channel) if !channel.is_empty() => output.extend_from_slice(channel),
            _ => return Err(anyhow!("Resampler produced no output")),
        }
    }

    output.drain(..delay);
    output.truncate(expected_len);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    /// Minimal 16-bit PCM WAV file.
    fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let block_align = channels * 2;
        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_decode_16k_mono_wav() {
        let dir = TempDir::new().unwrap();
        let samples: Vec<i16> = (0..16_000).map(|i| ((i % 100) as i16 - 50) * 300).collect();
        let path = write_file(&dir, "tone.wav", &wav_bytes(16_000, 1, &samples));

        let pcm = decode_to_mono_16k(&path).unwrap();
        assert_eq!(pcm.len(), 16_000);
        assert!(pcm.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_decode_downmixes_and_resamples() {
        let dir = TempDir::new().unwrap();
        // One second of 8 kHz stereo, left and right in opposite phase
        let samples: Vec<i16> = (0..8_000).flat_map(|_| [8_000i16, -8_000i16]).collect();
        let path = write_file(&dir, "stereo.wav", &wav_bytes(8_000, 2, &samples));

        let pcm = decode_to_mono_16k(&path).unwrap();
        assert!((pcm.len() as i64 - 16_000).abs() < 64, "got {} samples", pcm.len());
        assert!(pcm.iter().all(|s| s.abs() < 0.05));
    }

    #[test]
    fn test_resample_keeps_timing() {
        // Silence, then a constant level from 0.5 s on
        let input: Vec<f32> = (0..8_000).map(|i| if i < 4_000 { 0.0 } else { 0.5 }).collect();
        let output = resample(&input, 8_000, 16_000).unwrap();

        assert_eq!(output.len(), 16_000);
        assert!(output[7_900].abs() < 0.05, "step arrived early: {}", output[7_900]);
        assert!((output[8_100] - 0.5).abs() < 0.05, "step arrived late: {}", output[8_100]);
        assert!((output[15_800] - 0.5).abs() < 0.05, "tail was cut: {}", output[15_800]);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "noise.mp3", b"definitely not audio");
        assert!(decode_to_mono_16k(&path).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(decode_to_mono_16k(&dir.path().join("absent.wav")).is_err());
    }

    #[test]
    fn test_downmix() {
        let mut out = Vec::new();
        downmix_into(&[1.0, 0.0, 0.5, 0.5], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5]);
    }
}
