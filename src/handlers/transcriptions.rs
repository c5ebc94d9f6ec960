//! # Transcription Endpoint
//!
//! OpenAI-compatible `POST /v1/audio/transcriptions` (and its aliases).
//!
//! ## Request:
//! Multipart form data:
//! - `file` (required): the audio file
//! - `model` (default `base`): a configured model name
//! - `language` (default `en`): ISO 639-1 code. Sent empty (or as `null`)
//!   it lets the model detect the language.
//! - `temperature` (default `0.0`)
//! - `prompt` (default empty): text to condition the first window
//!
//! Any other field (`response_format`, `timestamp_granularities[]`, ...) is
//! accepted and ignored.
//!
//! ## Response:
//! ```json
//! { "text": "Hello world", "language": "en" }
//! ```

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::transcription::service::{self, TranscriptionRequest};
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;

/// Longest accepted value for a plain text field
const MAX_TEXT_FIELD_BYTES: usize = 64 * 1024;

const DEFAULT_MODEL: &str = "base";
const DEFAULT_LANGUAGE: &str = "en";

/// Raw form values, before defaults are applied.
#[derive(Debug, Default)]
pub struct TranscriptionForm {
    pub file: Option<Vec<u8>>,
    pub filename: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
    pub temperature: Option<String>,
    pub prompt: Option<String>,
}

impl TranscriptionForm {
    /// Read the whole multipart body, enforcing the upload limit as bytes arrive.
    pub async fn read(mut payload: Multipart, max_upload_bytes: usize) -> AppResult<Self> {
        let mut form = TranscriptionForm::default();

        while let Some(item) = payload.next().await {
            let mut field: Field =
                item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

            let Some(content_disposition) = field.content_disposition() else {
                continue;
            };
            let Some(name) = content_disposition.get_name().map(str::to_string) else {
                continue;
            };

            match name.as_str() {
                "file" => {
                    form.filename = content_disposition.get_filename().map(str::to_string);
                    form.file = Some(read_file(&mut field, max_upload_bytes).await?);
                }
                "model" => form.model = Some(read_text(&mut field, &name).await?),
                "language" => form.language = Some(read_text(&mut field, &name).await?),
                "temperature" => form.temperature = Some(read_text(&mut field, &name).await?),
                "prompt" => form.prompt = Some(read_text(&mut field, &name).await?),
                other => {
                    tracing::debug!(field = other, "Ignoring unsupported form field");
                }
            }
        }

        Ok(form)
    }

    /// Apply defaults and validate field values.
    pub fn into_request(self) -> AppResult<TranscriptionRequest> {
        let audio = self
            .file
            .ok_or_else(|| AppError::BadRequest("Missing required field: file".to_string()))?;

        let temperature = match self.temperature.as_deref().map(str::trim) {
            None | Some("") => 0.0,
            Some(raw) => raw
                .parse::<f32>()
                .ok()
                .filter(|t| t.is_finite())
                .ok_or_else(|| AppError::BadRequest(format!("Invalid temperature: {}", raw)))?,
        };

        Ok(TranscriptionRequest {
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            filename: self.filename,
            audio,
            language: language_hint(self.language),
            temperature,
            prompt: self.prompt.unwrap_or_default(),
        })
    }
}

/// Absent field: the default language. Empty or `null`: no hint, detect it.
fn language_hint(field: Option<String>) -> Option<String> {
    match field {
        None => Some(DEFAULT_LANGUAGE.to_string()),
        Some(value) => {
            let value = value.trim();
            if value.is_empty() || value.eq_ignore_ascii_case("null") {
                None
            } else {
                Some(value.to_string())
            }
        }
    }
}

async fn read_file(field: &mut Field, max_upload_bytes: usize) -> AppResult<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Upload error: {}", e)))?;
        if bytes.len() + chunk.len() > max_upload_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "Audio file exceeds the {} byte limit",
                max_upload_bytes
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

async fn read_text(field: &mut Field, name: &str) -> AppResult<String> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;
        if bytes.len() + chunk.len() > MAX_TEXT_FIELD_BYTES {
            return Err(AppError::BadRequest(format!("Field '{}' is too long", name)));
        }
        bytes.extend_from_slice(&chunk);
    }
    String::from_utf8(bytes)
        .map_err(|_| AppError::BadRequest(format!("Field '{}' is not valid UTF-8", name)))
}

/// Transcribe an uploaded audio file.
pub async fn create_transcription(
    state: web::Data<AppState>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let form = TranscriptionForm::read(payload, state.config.transcription.max_upload_bytes).await?;
    let request = form.into_request()?;

    let _active = state.track_transcription();
    let response =
        service::transcribe(&state.registry, &state.config.transcription, request).await?;

    Ok(HttpResponse::Ok().json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form_with_file() -> TranscriptionForm {
        TranscriptionForm {
            file: Some(b"audio".to_vec()),
            filename: Some("clip.wav".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let request = form_with_file().into_request().unwrap();
        assert_eq!(request.model, "base");
        assert_eq!(request.language.as_deref(), Some("en"));
        assert_eq!(request.temperature, 0.0);
        assert_eq!(request.prompt, "");
        assert_eq!(request.filename.as_deref(), Some("clip.wav"));
    }

    #[test]
    fn test_empty_language_means_detect() {
        assert_eq!(language_hint(Some(String::new())), None);
        assert_eq!(language_hint(Some("null".to_string())), None);
        assert_eq!(language_hint(Some(" fr ".to_string())), Some("fr".to_string()));
        assert_eq!(language_hint(None), Some("en".to_string()));
    }

    #[test]
    fn test_temperature_parsing() {
        let mut form = form_with_file();
        form.temperature = Some("0.2".to_string());
        assert_eq!(form.into_request().unwrap().temperature, 0.2);

        let mut form = form_with_file();
        form.temperature = Some("warm".to_string());
        assert!(matches!(form.into_request(), Err(AppError::BadRequest(_))));

        let mut form = form_with_file();
        form.temperature = Some("NaN".to_string());
        assert!(matches!(form.into_request(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_missing_file() {
        let form = TranscriptionForm {
            model: Some("base".to_string()),
            ..Default::default()
        };
        assert!(matches!(form.into_request(), Err(AppError::BadRequest(ref m)) if m.contains("file")));
    }
}
