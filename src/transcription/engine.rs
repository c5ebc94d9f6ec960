//! # Transcription Engine Contract
//!
//! The boundary between the HTTP gateway and whatever turns audio into text.
//! The gateway only ever talks to `dyn SpeechEngine`: the Candle Whisper
//! implementation lives in `whisper.rs`, and tests plug in scripted fakes.
//!
//! ## Key Types:
//! - **DecodeOptions**: Per-request decoding parameters
//! - **Segment**: One contiguous piece of transcribed text, in temporal order
//! - **TranscriptionInfo**: Metadata inferred by the engine (detected language, duration)
//! - **Transcription**: Segments plus metadata, as returned by an engine

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

/// Decoding parameters for a single transcription call.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOptions {
    /// Force this language (ISO 639-1 code like "en", "fr").
    /// `None` lets the engine detect the spoken language.
    pub language: Option<String>,

    /// Sampling temperature. 0.0 selects deterministic beam search.
    pub temperature: f32,

    /// Text used to condition the first window (vocabulary, spelling, style)
    pub initial_prompt: String,

    /// Beam width for deterministic decoding
    pub beam_size: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            language: None,
            temperature: 0.0,
            initial_prompt: String::new(),
            beam_size: 5,
        }
    }
}

/// One transcribed segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub id: usize,
    /// Start offset in seconds
    pub start: f64,
    /// End offset in seconds
    pub end: f64,
    /// Segment text exactly as decoded, including any leading space
    pub text: String,
    pub avg_logprob: f64,
    pub no_speech_prob: f64,
}

/// Metadata the engine infers while transcribing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionInfo {
    /// Language used for decoding: the forced one, or the detected one
    pub language: String,
    /// Confidence of the language detection (1.0 when forced)
    pub language_probability: f32,
    /// Audio duration in seconds
    pub duration: f64,
}

/// Output of one engine invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub segments: Vec<Segment>,
    pub info: TranscriptionInfo,
}

impl Transcription {
    /// Concatenate segment texts in the order produced, with no separator.
    pub fn text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }
}

/// A loaded speech-to-text model.
///
/// ## Thread Safety:
/// Engines are shared between all worker threads through the model registry,
/// so they must be `Send + Sync`. An implementation whose model cannot run
/// concurrent inferences serializes them internally.
///
/// ## Blocking:
/// `transcribe` is synchronous and CPU-bound. Callers run it on a blocking
/// thread (`tokio::task::spawn_blocking`), never directly on an actix worker.
pub trait SpeechEngine: Send + Sync {
    /// Transcribe the complete audio file at `audio`.
    fn transcribe(&self, audio: &Path, options: &DecodeOptions) -> Result<Transcription>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(id: usize, text: &str) -> Segment {
        Segment {
            id,
            start: id as f64 * 30.0,
            end: (id + 1) as f64 * 30.0,
            text: text.to_string(),
            avg_logprob: -0.2,
            no_speech_prob: 0.01,
        }
    }

    #[test]
    fn test_decode_options_default() {
        let options = DecodeOptions::default();
        assert_eq!(options.language, None);
        assert_eq!(options.temperature, 0.0);
        assert_eq!(options.initial_prompt, "");
        assert_eq!(options.beam_size, 5);
    }

    #[test]
    fn test_text_concatenates_without_separator() {
        let transcription = Transcription {
            segments: vec![segment(0, "Hello "), segment(1, "world")],
            info: TranscriptionInfo {
                language: "en".to_string(),
                language_probability: 0.98,
                duration: 42.0,
            },
        };
        assert_eq!(transcription.text(), "Hello world");
    }

    #[test]
    fn test_text_of_empty_transcription() {
        let transcription = Transcription {
            segments: Vec::new(),
            info: TranscriptionInfo {
                language: "en".to_string(),
                language_probability: 1.0,
                duration: 0.5,
            },
        };
        assert_eq!(transcription.text(), "");
    }
}
