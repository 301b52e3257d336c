//! Lightweight language detection by function-word scoring.
//!
//! Counts occurrences of high-frequency function words for each
//! supported language and picks the highest score. Ties and empty input
//! fall back to English, which keeps the output stable for short or
//! code-heavy pages.

const ENGLISH: &[&str] = &[
    "the", "and", "of", "to", "in", "is", "that", "for", "with", "was", "are", "this", "have",
    "from", "not",
];

const SPANISH: &[&str] = &[
    "el", "la", "de", "que", "los", "las", "una", "por", "con", "para", "del", "como", "más",
    "pero", "este",
];

const FRENCH: &[&str] = &[
    "le", "la", "les", "des", "est", "dans", "que", "pour", "qui", "avec", "sur", "une", "pas",
    "vous", "nous",
];

const GERMAN: &[&str] = &[
    "der", "die", "das", "und", "ist", "nicht", "von", "mit", "den", "auf", "für", "ein", "eine",
    "sich", "auch",
];

const PORTUGUESE: &[&str] = &[
    "de", "que", "não", "uma", "para", "com", "como", "mais", "dos", "das", "isso", "ele", "são",
    "este", "você",
];

const ITALIAN: &[&str] = &[
    "di", "che", "il", "per", "non", "una", "della", "con", "sono", "del", "gli", "come", "anche",
    "questo", "alla",
];

const LANGUAGES: &[(&str, &[&str])] = &[
    ("en", ENGLISH),
    ("es", SPANISH),
    ("fr", FRENCH),
    ("de", GERMAN),
    ("pt", PORTUGUESE),
    ("it", ITALIAN),
];

/// Detect the dominant language of `text`, returning an ISO 639-1 code.
/// Highest function-word score wins; ties break to English and a text
/// with no matches defaults to English.
pub fn detect_language(text: &str) -> String {
    let mut scores = [0usize; 6];

    for raw_word in text.split_whitespace() {
        let word: String = raw_word
            .chars()
            .filter(|c| c.is_alphabetic())
            .flat_map(|c| c.to_lowercase())
            .collect();
        if word.is_empty() {
            continue;
        }
        for (i, (_, words)) in LANGUAGES.iter().enumerate() {
            if words.contains(&word.as_str()) {
                scores[i] += 1;
            }
        }
    }

    let mut best = 0usize;
    for (i, score) in scores.iter().enumerate() {
        if *score > scores[best] {
            best = i;
        }
    }
    LANGUAGES[best].0.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_english() {
        assert_eq!(
            detect_language("the quick brown fox is in the garden and that is fine"),
            "en"
        );
    }

    #[test]
    fn test_detects_spanish() {
        assert_eq!(
            detect_language("el perro corre por la calle con los niños para jugar"),
            "es"
        );
    }

    #[test]
    fn test_detects_french() {
        assert_eq!(
            detect_language("les étudiants sont dans la salle pour le cours avec vous"),
            "fr"
        );
    }

    #[test]
    fn test_detects_german() {
        assert_eq!(
            detect_language("der Hund und die Katze sind nicht mit dem Ball auf der Wiese"),
            "de"
        );
    }

    #[test]
    fn test_empty_defaults_to_english() {
        assert_eq!(detect_language(""), "en");
        assert_eq!(detect_language("12345 67890 %%%"), "en");
    }

    #[test]
    fn test_punctuation_stripped() {
        assert_eq!(detect_language("The, and. of! to? in;"), "en");
    }
}
