//! # Transcription Service
//!
//! One transcription request from model lookup to response:
//! 1. Resolve the model (unknown names fail before any file I/O)
//! 2. Stage the uploaded bytes to a uniquely named file
//! 3. Run the engine on a blocking thread
//! 4. Concatenate the segments and pick the language to report
//!
//! The staged file is removed on every path out of step 2 and 3: the guard
//! moves into the blocking task, so it is dropped when the engine returns,
//! fails or panics, and even when the HTTP client has already gone away.

use crate::audio::staging::StagedAudio;
use crate::config::TranscriptionSettings;
use crate::error::{AppError, AppResult};
use crate::transcription::engine::{DecodeOptions, Transcription};
use crate::transcription::registry::ModelRegistry;
use serde::Serialize;
use std::time::Instant;

/// A parsed transcription request.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub model: String,
    /// Client-side filename, used only for its extension
    pub filename: Option<String>,
    pub audio: Vec<u8>,
    /// `None` lets the engine detect the language
    pub language: Option<String>,
    pub temperature: f32,
    pub prompt: String,
}

/// Successful transcription, as serialized to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionResponse {
    pub text: String,
    pub language: String,
}

/// Run one transcription request end to end.
pub async fn transcribe(
    registry: &ModelRegistry,
    settings: &TranscriptionSettings,
    request: TranscriptionRequest,
) -> AppResult<TranscriptionResponse> {
    let engine = registry
        .get(&request.model)
        .ok_or_else(|| AppError::BadRequest(format!("Model not found: {}", request.model)))?;

    let options = DecodeOptions {
        language: request.language.clone(),
        temperature: request.temperature,
        initial_prompt: request.prompt,
        beam_size: settings.beam_size,
    };
    let staging_dir = settings.staging_dir();
    let model = request.model;
    let filename = request.filename;
    let audio = request.audio;

    tracing::info!(
        model = %model,
        bytes = audio.len(),
        language = ?options.language,
        temperature = options.temperature,
        "Starting transcription"
    );
    let start_time = Instant::now();

    let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<Transcription> {
        let staged = StagedAudio::write(&staging_dir, filename.as_deref(), &audio)?;
        drop(audio);
        engine.transcribe(staged.path(), &options)
        // `staged` drops here and removes the file
    })
    .await;

    let transcription = match outcome {
        Ok(Ok(transcription)) => transcription,
        Ok(Err(e)) => {
            tracing::error!(model = %model, error = %format!("{:#}", e), "Transcription failed");
            return Err(e.context("Error during transcription").into());
        }
        Err(join_error) => {
            tracing::error!(model = %model, error = %join_error, "Transcription task aborted");
            return Err(AppError::Internal(format!(
                "Error during transcription: {}",
                join_error
            )));
        }
    };

    tracing::info!(
        model = %model,
        segments = transcription.segments.len(),
        detected_language = %transcription.info.language,
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "Transcription complete"
    );

    let text = transcription.text();
    let language = request
        .language
        .unwrap_or(transcription.info.language);
    Ok(TranscriptionResponse { text, language })
}
