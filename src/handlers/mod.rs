pub mod models;
pub mod preflight;
pub mod transcriptions;

pub use models::list_models;
pub use transcriptions::create_transcription;
