//! # Supported Target Languages
//!
//! Maps the display names offered by the upload form to the two-letter codes
//! the translation adapter works with. Lookup is exact and case-sensitive:
//! "Spanish" resolves, "spanish" does not.

use std::fmt;

/// Display name → language code, in the order the upload form lists them.
pub const LANGUAGE_CODES: [(&str, &str); 16] = [
    ("Spanish", "es"),
    ("French", "fr"),
    ("German", "de"),
    ("Italian", "it"),
    ("Portuguese", "pt"),
    ("Russian", "ru"),
    ("Chinese", "zh"),
    ("Japanese", "ja"),
    ("Korean", "ko"),
    ("Arabic", "ar"),
    ("Hindi", "hi"),
    ("Bengali", "bn"),
    ("Tamil", "ta"),
    ("Telugu", "te"),
    ("Marathi", "mr"),
    ("Gujarati", "gu"),
];

/// The requested language is not in [`LANGUAGE_CODES`]. Carries the name as sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedLanguage(pub String);

impl fmt::Display for UnsupportedLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unsupported language: {}", self.0)
    }
}

impl std::error::Error for UnsupportedLanguage {}

/// Resolve a display name to its language code.
pub fn resolve(name: &str) -> Result<&'static str, UnsupportedLanguage> {
    LANGUAGE_CODES
        .iter()
        .find(|(display, _)| *display == name)
        .map(|(_, code)| *code)
        .ok_or_else(|| UnsupportedLanguage(name.to_string()))
}

/// All display names, in table order.
pub fn supported_names() -> Vec<&'static str> {
    LANGUAGE_CODES.iter().map(|(name, _)| *name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_resolve_known_languages() {
        assert_eq!(resolve("Spanish"), Ok("es"));
        assert_eq!(resolve("Chinese"), Ok("zh"));
        assert_eq!(resolve("Gujarati"), Ok("gu"));
    }

    #[test]
    fn test_resolve_is_case_sensitive() {
        assert_eq!(resolve("spanish"), Err(UnsupportedLanguage("spanish".to_string())));
        assert!(resolve(" Spanish").is_err());
        assert!(resolve("").is_err());
    }

    #[test]
    fn test_unknown_language_message_echoes_name() {
        let err = resolve("Klingon").unwrap_err();
        assert_eq!(err.to_string(), "Unsupported language: Klingon");
    }

    #[test]
    fn test_table_has_sixteen_unique_entries() {
        let names: HashSet<_> = LANGUAGE_CODES.iter().map(|(n, _)| n).collect();
        let codes: HashSet<_> = LANGUAGE_CODES.iter().map(|(_, c)| c).collect();
        assert_eq!(names.len(), 16);
        assert_eq!(codes.len(), 16);
        assert!(codes.iter().all(|c| c.len() == 2));
        assert_eq!(supported_names().first(), Some(&"Spanish"));
    }
}
