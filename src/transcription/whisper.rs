//! # Candle Whisper Engine
//!
//! The `SpeechEngine` used in production: OpenAI Whisper checkpoints from the
//! Hugging Face hub, run with Candle.
//!
//! ## Pipeline:
//! 1. Decode the uploaded container to 16 kHz mono PCM (`audio::decoder`)
//! 2. Compute the log-mel spectrogram of the whole file
//! 3. Walk it in 30 second windows; for every window run the encoder once and
//!    decode text tokens with beam search (temperature 0) or sampling
//! 4. Drop windows that look like silence, keep the rest as segments
//!
//! ## Key Rust Concepts:
//! - **Mutex**: `Whisper` needs `&mut self` for its attention caches, so one
//!   engine runs one inference at a time while still being `Sync`
//! - **Tensor ops**: Candle tensors are immutable values; every op returns a new tensor

use crate::audio::decoder::decode_to_mono_16k;
use crate::config::ModelConfig;
use crate::device::{DeviceManager, DevicePreference};
use crate::transcription::engine::{
    DecodeOptions, Segment, SpeechEngine, Transcription, TranscriptionInfo,
};
use crate::transcription::languages::{is_supported, language_token, LANGUAGES};
use crate::transcription::mel::mel_filters;
use anyhow::{anyhow, Result};
use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::ops::{log_softmax, softmax};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::whisper::{self as m, Config};
use hf_hub::api::tokio::ApiBuilder;
use hf_hub::{Repo, RepoType};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tokenizers::Tokenizer;

/// Multilingual checkpoints have 51865 (or more, for large-v3) tokens.
const MULTILINGUAL_VOCAB_SIZE: usize = 51865;

/// Windows decoded above this temperature do not condition the next one.
const PROMPT_RESET_TEMPERATURE: f32 = 0.5;

const SAMPLING_SEED: u64 = 299_792_458;

/// Special token ids resolved once from the tokenizer.
#[derive(Debug, Clone)]
struct SpecialTokens {
    sot: u32,
    eot: u32,
    transcribe: u32,
    no_timestamps: u32,
    start_of_prev: u32,
    no_speech: Option<u32>,
    /// `(code, token id)` for every language this vocabulary knows
    languages: Vec<(&'static str, u32)>,
}

impl SpecialTokens {
    fn resolve(tokenizer: &Tokenizer) -> Result<Self> {
        let languages = LANGUAGES
            .iter()
            .filter_map(|code| {
                tokenizer
                    .token_to_id(&language_token(code))
                    .map(|id| (*code, id))
            })
            .collect();

        Ok(Self {
            sot: token_id(tokenizer, m::SOT_TOKEN)?,
            eot: token_id(tokenizer, m::EOT_TOKEN)?,
            transcribe: token_id(tokenizer, m::TRANSCRIBE_TOKEN)?,
            no_timestamps: token_id(tokenizer, m::NO_TIMESTAMPS_TOKEN)?,
            start_of_prev: token_id(tokenizer, "<|startofprev|>")?,
            no_speech: m::NO_SPEECH_TOKENS
                .iter()
                .find_map(|token| tokenizer.token_to_id(token)),
            languages,
        })
    }

    fn language(&self, code: &str) -> Option<u32> {
        self.languages
            .iter()
            .find(|(known, _)| *known == code)
            .map(|(_, id)| *id)
    }
}

/// Result of decoding one 30 second window.
#[derive(Debug)]
struct DecodedWindow {
    tokens: Vec<u32>,
    sum_logprob: f64,
    no_speech_prob: f64,
}

impl DecodedWindow {
    /// Average log-probability, counting the end-of-text token.
    fn avg_logprob(&self) -> f64 {
        self.sum_logprob / (self.tokens.len() + 1) as f64
    }
}

/// One live hypothesis during beam search.
#[derive(Debug, Clone)]
struct Beam {
    tokens: Vec<u32>,
    logprob: f64,
}

/// A Whisper checkpoint loaded on a Candle device.
pub struct WhisperEngine {
    name: String,
    model: Mutex<m::model::Whisper>,
    tokenizer: Tokenizer,
    config: Config,
    device: Device,
    mel_filters: Vec<f32>,
    /// Additive logit mask: 0 for allowed tokens, -inf for suppressed ones
    suppress_mask: Tensor,
    special: SpecialTokens,
}

impl WhisperEngine {
    /// Download (or reuse from the hub cache) and load the model registered as `name`.
    ///
    /// ## Environment:
    /// - `HF_TOKEN`: token for gated or private repositories
    /// - `HF_HUB_CACHE` / `HF_HOME`: cache location
    pub async fn load(name: &str, model_config: &ModelConfig) -> Result<Self> {
        let repo_id = model_config.repo_for(name)?;
        let revision = model_config.revision().to_string();
        let preference: DevicePreference = model_config
            .device
            .parse()
            .map_err(|e: String| anyhow!(e))?;
        let device = DeviceManager::get_device(preference);

        tracing::info!(
            model = name,
            repo = %repo_id,
            revision = %revision,
            device = DeviceManager::get_device_info(&device),
            "Loading Whisper model"
        );
        let start_time = Instant::now();

        let mut builder = ApiBuilder::new()
            .with_progress(false)
            .with_token(std::env::var("HF_TOKEN").ok());
        if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
            builder = builder.with_cache_dir(PathBuf::from(cache_dir));
        } else if let Ok(hf_home) = std::env::var("HF_HOME") {
            builder = builder.with_cache_dir(PathBuf::from(hf_home).join("hub"));
        }
        let api = builder
            .build()
            .map_err(|e| anyhow!("Failed to initialise the Hugging Face client: {}", e))?;
        let repo = api.repo(Repo::with_revision(
            repo_id.clone(),
            RepoType::Model,
            revision,
        ));

        let config_path = repo
            .get("config.json")
            .await
            .map_err(|e| anyhow!("Failed to download config.json from {}: {}", repo_id, e))?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .await
            .map_err(|e| anyhow!("Failed to download tokenizer.json from {}: {}", repo_id, e))?;
        let weights_path = repo
            .get("model.safetensors")
            .await
            .map_err(|e| anyhow!("Failed to download model.safetensors from {}: {}", repo_id, e))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(&config_path)?)?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        let special = SpecialTokens::resolve(&tokenizer)?;

        // SAFETY: the safetensors file is memory-mapped read-only and the hub
        // cache does not rewrite files in place
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let mel_filters = mel_filters(m::SAMPLE_RATE, m::N_FFT, config.num_mel_bins);
        let suppress_mask = build_suppress_mask(&config, special.eot, &device)?;

        tracing::info!(
            model = name,
            elapsed_secs = start_time.elapsed().as_secs_f64(),
            multilingual = config.vocab_size >= MULTILINGUAL_VOCAB_SIZE,
            "Whisper model loaded"
        );

        Ok(Self {
            name: name.to_string(),
            model: Mutex::new(model),
            tokenizer,
            config,
            device,
            mel_filters,
            suppress_mask,
            special,
        })
    }

    /// Exclusive access to the model. A panic in an earlier inference can
    /// leave stale attention caches behind, so a poisoned lock is recovered
    /// and the caches cleared.
    fn lock_model(&self) -> MutexGuard<'_, m::model::Whisper> {
        lock_recovering(&self.model, |model| {
            tracing::warn!(model = %self.name, "Recovering model after a panicked inference");
            model.reset_kv_cache();
        })
    }

    fn is_multilingual(&self) -> bool {
        self.config.vocab_size >= MULTILINGUAL_VOCAB_SIZE
    }

    /// Most likely spoken language for one window of encoder output.
    fn detect_language(
        &self,
        model: &mut m::model::Whisper,
        audio_features: &Tensor,
    ) -> Result<(&'static str, f32)> {
        let (codes, ids): (Vec<&'static str>, Vec<u32>) =
            self.special.languages.iter().copied().unzip();
        if ids.is_empty() {
            return Err(anyhow!("Tokenizer has no language tokens"));
        }

        let tokens = Tensor::new(&[[self.special.sot]], &self.device)?;
        let ys = model.decoder.forward(&tokens, audio_features, true)?;
        let logits = model.decoder.final_linear(&ys.i((..1, ..1))?)?.flatten_all()?;
        let language_ids = Tensor::new(ids.as_slice(), &self.device)?;
        let probs = softmax(&logits.index_select(&language_ids, 0)?, D::Minus1)?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()?;

        let (best, probability) = probs
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| anyhow!("Language detection produced no probabilities"))?;
        Ok((codes[best], probability))
    }

    /// Decoder prompt for one window: optional history, then the task tokens.
    ///
    /// Returns the prompt and the index of `<|startoftranscript|>` inside it.
    fn build_prompt(&self, history: &[u32], language: Option<u32>) -> (Vec<u32>, usize) {
        let mut prompt = Vec::new();
        if !history.is_empty() {
            let keep = self.config.max_target_positions / 2 - 1;
            prompt.push(self.special.start_of_prev);
            prompt.extend_from_slice(&history[history.len().saturating_sub(keep)..]);
        }

        let sot_index = prompt.len();
        prompt.push(self.special.sot);
        if let Some(language) = language {
            prompt.push(language);
            prompt.push(self.special.transcribe);
        }
        prompt.push(self.special.no_timestamps);
        (prompt, sot_index)
    }

    /// Probability of the no-speech token at the `<|startoftranscript|>` position.
    fn no_speech_prob(
        &self,
        model: &mut m::model::Whisper,
        ys: &Tensor,
        sot_index: usize,
    ) -> Result<f64> {
        let Some(no_speech) = self.special.no_speech else {
            return Ok(0.0);
        };
        let logits = model
            .decoder
            .final_linear(&ys.i((..1, sot_index..sot_index + 1))?)?
            .flatten_all()?;
        let probs = softmax(&logits.to_dtype(DType::F32)?, D::Minus1)?;
        Ok(probs.i(no_speech as usize)?.to_scalar::<f32>()? as f64)
    }

    /// Logits of the last position for every row of a `(batch, seq)` token batch.
    fn next_token_logprobs(
        &self,
        model: &mut m::model::Whisper,
        ys: &Tensor,
    ) -> Result<Tensor> {
        let seq_len = ys.dim(1)?;
        let logits = model
            .decoder
            .final_linear(&ys.i((.., seq_len - 1..))?)?
            .squeeze(1)?
            .to_dtype(DType::F32)?
            .broadcast_add(&self.suppress_mask)?;
        Ok(log_softmax(&logits, D::Minus1)?)
    }

    /// Deterministic decoding: beam search ranked by average log-probability.
    fn decode_beam(
        &self,
        model: &mut m::model::Whisper,
        audio_features: &Tensor,
        prompt: &[u32],
        sot_index: usize,
        beam_size: usize,
    ) -> Result<DecodedWindow> {
        let max_len = self.config.max_target_positions;
        let sample_len = max_len / 2;
        let mut beams = vec![Beam { tokens: Vec::new(), logprob: 0.0 }];
        let mut finished: Vec<Beam> = Vec::new();
        let mut no_speech_prob = 0.0;

        for step in 0..sample_len {
            let seq_len = prompt.len() + step;
            if seq_len >= max_len {
                break;
            }

            let batch = beams.len();
            let rows: Vec<u32> = beams
                .iter()
                .flat_map(|beam| prompt.iter().chain(beam.tokens.iter()).copied())
                .collect();
            let tokens = Tensor::from_vec(rows, (batch, seq_len), &self.device)?;
            let features = audio_features.repeat((batch, 1, 1))?;

            // The batch shrinks and reorders between steps, so the
            // cross-attention cache is rebuilt every time
            let ys = model.decoder.forward(&tokens, &features, true)?;
            if step == 0 {
                no_speech_prob = self.no_speech_prob(model, &ys, sot_index)?;
            }
            let logprobs = self.next_token_logprobs(model, &ys)?.to_vec2::<f32>()?;

            let mut candidates = Vec::with_capacity(batch * (beam_size + 1));
            for (beam, row) in beams.iter().zip(logprobs) {
                for (token, logprob) in top_k(&row, beam_size + 1) {
                    let mut tokens = beam.tokens.clone();
                    tokens.push(token);
                    candidates.push(Beam {
                        tokens,
                        logprob: beam.logprob + logprob as f64,
                    });
                }
            }
            candidates.sort_by(|a, b| b.logprob.total_cmp(&a.logprob));

            beams.clear();
            for mut candidate in candidates {
                if candidate.tokens.last() == Some(&self.special.eot) {
                    if finished.len() < beam_size {
                        candidate.tokens.pop();
                        finished.push(candidate);
                    }
                } else if beams.len() < beam_size {
                    beams.push(candidate);
                }
                if beams.len() >= beam_size && finished.len() >= beam_size {
                    break;
                }
            }

            if beams.is_empty() || finished.len() >= beam_size {
                break;
            }
        }

        // Out of room before any hypothesis ended: rank the live ones
        if finished.is_empty() {
            finished = beams;
        }

        let best = finished
            .into_iter()
            .max_by(|a, b| {
                let score_a = a.logprob / (a.tokens.len() + 1) as f64;
                let score_b = b.logprob / (b.tokens.len() + 1) as f64;
                score_a.total_cmp(&score_b)
            })
            .ok_or_else(|| anyhow!("Beam search produced no hypothesis"))?;

        Ok(DecodedWindow {
            tokens: best.tokens,
            sum_logprob: best.logprob,
            no_speech_prob,
        })
    }

    /// Temperature sampling, one token at a time.
    fn decode_sampled(
        &self,
        model: &mut m::model::Whisper,
        audio_features: &Tensor,
        prompt: &[u32],
        sot_index: usize,
        temperature: f32,
    ) -> Result<DecodedWindow> {
        let max_len = self.config.max_target_positions;
        let sample_len = max_len / 2;
        let mut processor = LogitsProcessor::new(SAMPLING_SEED, Some(temperature as f64), None);
        let mut tokens = prompt.to_vec();
        let mut sum_logprob = 0.0;
        let mut no_speech_prob = 0.0;

        for step in 0..sample_len {
            if tokens.len() >= max_len {
                break;
            }

            let input = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = model.decoder.forward(&input, audio_features, step == 0)?;
            if step == 0 {
                no_speech_prob = self.no_speech_prob(model, &ys, sot_index)?;
            }

            let seq_len = ys.dim(1)?;
            let logits = model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .flatten_all()?
                .to_dtype(DType::F32)?
                .broadcast_add(&self.suppress_mask)?;
            let next = processor.sample(&logits)?;
            let logprob = log_softmax(&logits, D::Minus1)?
                .i(next as usize)?
                .to_scalar::<f32>()?;
            sum_logprob += logprob as f64;

            if next == self.special.eot {
                break;
            }
            tokens.push(next);
        }

        Ok(DecodedWindow {
            tokens: tokens.split_off(prompt.len()),
            sum_logprob,
            no_speech_prob,
        })
    }

    /// Token ids of the caller's prompt, with the leading space Whisper expects.
    fn encode_initial_prompt(&self, prompt: &str) -> Result<Vec<u32>> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Ok(Vec::new());
        }
        let encoding = self
            .tokenizer
            .encode(format!(" {}", prompt), false)
            .map_err(|e| anyhow!("Failed to tokenize prompt: {}", e))?;
        Ok(encoding
            .get_ids()
            .iter()
            .copied()
            .filter(|id| *id < self.special.eot)
            .collect())
    }

    fn run(&self, pcm: Vec<f32>, options: &DecodeOptions) -> Result<Transcription> {
        let duration = pcm.len() as f64 / m::SAMPLE_RATE as f64;
        let content_frames = pcm.len() / m::HOP_LENGTH;

        // Trailing silence lets the last window span a full 30 seconds
        let mut samples = pcm;
        samples.extend(std::iter::repeat(0.0f32).take(m::N_SAMPLES));
        let mel = m::audio::pcm_to_mel(&self.config, &samples, &self.mel_filters);
        let n_mels = self.config.num_mel_bins;
        let mel_len = mel.len();
        let mel = Tensor::from_vec(mel, (1, n_mels, mel_len / n_mels), &self.device)?;
        let total_frames = mel.dim(2)?;

        let forced = match options.language.as_deref() {
            Some(code) if self.is_multilingual() => Some(
                self.special
                    .language(code)
                    .filter(|_| is_supported(code))
                    .map(|id| (code.to_string(), id))
                    .ok_or_else(|| anyhow!("Unsupported language: {}", code))?,
            ),
            _ => None,
        };

        let mut language: Option<(String, u32)> = forced.clone();
        let mut language_probability = 1.0f32;
        let mut history = self.encode_initial_prompt(&options.initial_prompt)?;
        let mut segments = Vec::new();

        let mut model = self.lock_model();

        let mut seek = 0;
        while seek < content_frames {
            let window_frames = usize::min(content_frames - seek, m::N_FRAMES);
            let mel_window = mel.narrow(2, seek, usize::min(m::N_FRAMES, total_frames - seek))?;
            let audio_features = model.encoder.forward(&mel_window, true)?;

            if language.is_none() && self.is_multilingual() {
                let (code, probability) = self.detect_language(&mut model, &audio_features)?;
                tracing::debug!(model = %self.name, language = code, probability, "Detected language");
                language = self
                    .special
                    .language(code)
                    .map(|id| (code.to_string(), id));
                language_probability = probability;
            }

            let (prompt, sot_index) =
                self.build_prompt(&history, language.as_ref().map(|(_, id)| *id));
            let decoded = if options.temperature <= 0.0 {
                self.decode_beam(&mut model, &audio_features, &prompt, sot_index, options.beam_size.max(1))?
            } else {
                self.decode_sampled(&mut model, &audio_features, &prompt, sot_index, options.temperature)?
            };
            model.reset_kv_cache();

            let start = (seek * m::HOP_LENGTH) as f64 / m::SAMPLE_RATE as f64;
            let end = ((seek + window_frames) * m::HOP_LENGTH) as f64 / m::SAMPLE_RATE as f64;
            seek += window_frames;

            let avg_logprob = decoded.avg_logprob();
            if decoded.no_speech_prob > m::NO_SPEECH_THRESHOLD && avg_logprob < m::LOGPROB_THRESHOLD {
                tracing::debug!(
                    model = %self.name,
                    start,
                    no_speech_prob = decoded.no_speech_prob,
                    "Skipping silent window"
                );
                continue;
            }

            let text = self
                .tokenizer
                .decode(&decoded.tokens, true)
                .map_err(|e| anyhow!("Failed to detokenize: {}", e))?;

            if options.temperature > PROMPT_RESET_TEMPERATURE {
                history.clear();
            } else {
                history.extend_from_slice(&decoded.tokens);
            }

            segments.push(Segment {
                id: segments.len(),
                start,
                end,
                text,
                avg_logprob,
                no_speech_prob: decoded.no_speech_prob,
            });
        }

        let language = language
            .map(|(code, _)| code)
            .unwrap_or_else(|| options.language.clone().unwrap_or_else(|| "en".to_string()));

        Ok(Transcription {
            segments,
            info: TranscriptionInfo {
                language,
                language_probability,
                duration,
            },
        })
    }
}

impl SpeechEngine for WhisperEngine {
    fn transcribe(&self, audio: &Path, options: &DecodeOptions) -> Result<Transcription> {
        let start_time = Instant::now();
        let pcm = decode_to_mono_16k(audio)?;
        let transcription = self.run(pcm, options)?;

        tracing::info!(
            model = %self.name,
            audio_secs = transcription.info.duration,
            elapsed_secs = start_time.elapsed().as_secs_f64(),
            segments = transcription.segments.len(),
            language = %transcription.info.language,
            "Transcription finished"
        );
        Ok(transcription)
    }
}

/// Lock `mutex`, running `reset` on the value first if an earlier holder panicked.
fn lock_recovering<T>(mutex: &Mutex<T>, reset: impl FnOnce(&mut T)) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        mutex.clear_poison();
        let mut guard = poisoned.into_inner();
        reset(&mut guard);
        guard
    })
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("Token not found in vocabulary: {}", token))
}

/// `-inf` for the model's suppress list and every special or timestamp token.
///
/// All special tokens sort after `<|endoftext|>` in Whisper vocabularies.
fn build_suppress_mask(config: &Config, eot: u32, device: &Device) -> Result<Tensor> {
    let mask: Vec<f32> = (0..config.vocab_size as u32)
        .map(|id| {
            if id > eot || config.suppress_tokens.contains(&id) {
                f32::NEG_INFINITY
            } else {
                0.0
            }
        })
        .collect();
    Ok(Tensor::new(mask.as_slice(), device)?)
}

/// The `k` best finite `(token, logprob)` pairs of one row, best first.
fn top_k(row: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut ranked: Vec<(u32, f32)> = row
        .iter()
        .enumerate()
        .filter(|(_, logprob)| logprob.is_finite())
        .map(|(token, logprob)| (token as u32, *logprob))
        .collect();
    if ranked.len() > k {
        ranked.select_nth_unstable_by(k - 1, |a, b| b.1.total_cmp(&a.1));
        ranked.truncate(k);
    }
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_k_orders_and_skips_suppressed() {
        let row = [-2.0, f32::NEG_INFINITY, -0.5, -1.0, -3.0];
        assert_eq!(top_k(&row, 2), vec![(2, -0.5), (3, -1.0)]);
        assert_eq!(top_k(&row, 10).len(), 4);
    }

    #[test]
    fn test_poisoned_lock_is_reset_and_reusable() {
        let cache = Mutex::new(vec![1u32, 2, 3]);
        let crashed = std::panic::catch_unwind(|| {
            let _guard = cache.lock().unwrap();
            panic!("inference crashed");
        });
        assert!(crashed.is_err());
        assert!(cache.is_poisoned());

        let guard = lock_recovering(&cache, |stale| stale.clear());
        assert!(guard.is_empty());
        drop(guard);

        assert!(!cache.is_poisoned());
        let mut resets = 0;
        let guard = lock_recovering(&cache, |_| resets += 1);
        drop(guard);
        assert_eq!(resets, 0);
    }

    #[test]
    fn test_avg_logprob_counts_end_of_text() {
        let window = DecodedWindow {
            tokens: vec![1, 2, 3],
            sum_logprob: -2.0,
            no_speech_prob: 0.1,
        };
        assert!((window.avg_logprob() + 0.5).abs() < 1e-9);

        let empty = DecodedWindow {
            tokens: Vec::new(),
            sum_logprob: -0.3,
            no_speech_prob: 0.9,
        };
        assert!((empty.avg_logprob() + 0.3).abs() < 1e-9);
    }
}
