//! # Audio Handling
//!
//! - **staging**: Writes each upload to a uniquely named temporary file that
//!   is removed on every exit path
//! - **decoder**: Decodes common containers (WAV, MP3, M4A, FLAC, OGG) to the
//!   16 kHz mono PCM Whisper expects

pub mod decoder;
pub mod staging;
