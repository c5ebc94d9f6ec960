//! # Whisper Model Sizes
//!
//! Maps the well-known Whisper model names onto their Hugging Face
//! repositories, so a config entry like `[models.small]` needs no `repo` key.
//!
//! ## Trade-offs:
//! - **Size vs Accuracy**: Larger models are more accurate but slower
//! - **`.en` variants**: English-only, a little more accurate on English and
//!   unable to detect or force other languages

use anyhow::{anyhow, Result};

/// Available Whisper model sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelSize {
    Tiny,
    TinyEn,
    Base,
    BaseEn,
    Small,
    SmallEn,
    Medium,
    MediumEn,
    Large,
    LargeV3,
}

impl ModelSize {
    /// Get the HuggingFace model repository name.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::TinyEn => "openai/whisper-tiny.en",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::BaseEn => "openai/whisper-base.en",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::SmallEn => "openai/whisper-small.en",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::MediumEn => "openai/whisper-medium.en",
            ModelSize::Large => "openai/whisper-large-v2",
            ModelSize::LargeV3 => "openai/whisper-large-v3",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "tiny.en" => Ok(ModelSize::TinyEn),
            "base" => Ok(ModelSize::Base),
            "base.en" => Ok(ModelSize::BaseEn),
            "small" => Ok(ModelSize::Small),
            "small.en" => Ok(ModelSize::SmallEn),
            "medium" => Ok(ModelSize::Medium),
            "medium.en" => Ok(ModelSize::MediumEn),
            "large" | "large-v2" => Ok(ModelSize::Large),
            "large-v3" => Ok(ModelSize::LargeV3),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::TinyEn => "tiny.en",
            ModelSize::Base => "base",
            ModelSize::BaseEn => "base.en",
            ModelSize::Small => "small",
            ModelSize::SmallEn => "small.en",
            ModelSize::Medium => "medium",
            ModelSize::MediumEn => "medium.en",
            ModelSize::Large => "large",
            ModelSize::LargeV3 => "large-v3",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_size_parsing() {
        assert_eq!("medium".parse::<ModelSize>().unwrap(), ModelSize::Medium);
        assert_eq!("LARGE".parse::<ModelSize>().unwrap(), ModelSize::Large);
        assert_eq!("base.en".parse::<ModelSize>().unwrap(), ModelSize::BaseEn);
        assert!("invalid".parse::<ModelSize>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for size in [ModelSize::Tiny, ModelSize::SmallEn, ModelSize::LargeV3] {
            assert_eq!(size.to_string().parse::<ModelSize>().unwrap(), size);
        }
    }

    #[test]
    fn test_repo_names() {
        assert_eq!(ModelSize::Base.repo_name(), "openai/whisper-base");
        assert_eq!(ModelSize::Large.repo_name(), "openai/whisper-large-v2");
        assert_eq!(ModelSize::TinyEn.repo_name(), "openai/whisper-tiny.en");
    }
}
