//! # Transcription Module
//!
//! Everything between "an uploaded file and a model name" and "text plus a
//! language code".
//!
//! ## Key Components:
//! - **engine**: The `SpeechEngine` contract the rest of the crate depends on
//! - **whisper**: Candle Whisper implementation of that contract
//! - **registry**: Name → engine map built once at startup
//! - **service**: Per-request flow (lookup, staging, blocking inference, response)
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39M parameters, fastest but least accurate
//! - **base**: ~74M parameters, the default
//! - **small**: ~244M parameters
//! - **medium**: ~769M parameters
//! - **large** / **large-v3**: ~1550M parameters, best accuracy but slowest

pub mod engine;
pub mod languages;
pub mod mel;
pub mod model;
pub mod registry;
pub mod service;
pub mod whisper;
