//! Language codes known to multilingual Whisper checkpoints, in token order.
//!
//! Each code has a matching special token `<|code|>` in the tokenizer.
//! `yue` only exists in large-v3 vocabularies; lookups skip codes the
//! loaded tokenizer does not know.

pub const LANGUAGES: [&str; 100] = [
    "en", "zh", "de", "es", "ru", "ko", "fr", "ja", "pt", "tr", "pl", "ca", "nl", "ar", "sv",
    "it", "id", "hi", "fi", "vi", "he", "uk", "el", "ms", "cs", "ro", "da", "hu", "ta", "no",
    "th", "ur", "hr", "bg", "lt", "la", "mi", "ml", "cy", "sk", "te", "fa", "lv", "bn", "sr",
    "az", "sl", "kn", "et", "mk", "br", "eu", "is", "hy", "ne", "mn", "bs", "kk", "sq", "sw",
    "gl", "mr", "pa", "si", "km", "sn", "yo", "so", "af", "oc", "ka", "be", "tg", "sd", "gu",
    "am", "yi", "lo", "uz", "fo", "ht", "ps", "tk", "nn", "mt", "sa", "lb", "my", "bo", "tl",
    "mg", "as", "tt", "haw", "ln", "ha", "ba", "jw", "su", "yue",
];

/// Special token text for a language code.
pub fn language_token(code: &str) -> String {
    format!("<|{}|>", code)
}

/// Whether `code` is a language Whisper can be forced to.
pub fn is_supported(code: &str) -> bool {
    LANGUAGES.contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_table() {
        assert_eq!(LANGUAGES[0], "en");
        assert_eq!(LANGUAGES.len(), 100);
        assert!(is_supported("fr"));
        assert!(is_supported("haw"));
        assert!(!is_supported("xx"));
        assert_eq!(language_token("de"), "<|de|>");
    }
}
