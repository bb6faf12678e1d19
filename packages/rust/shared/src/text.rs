//! Text normalization helpers shared by plan building, scoring and dedup.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Words that carry no topical signal and are dropped from keyword lists.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "how", "in", "into", "is",
    "it", "its", "of", "on", "or", "over", "that", "the", "their", "this", "to", "under", "using",
    "via", "vs", "what", "when", "which", "who", "why", "with", "within", "without",
];

/// Collapse every run of whitespace to a single space and trim the ends.
///
/// Case and punctuation are preserved; use [`normalize_text`] for
/// comparison keys.
pub fn collapse_whitespace(s: &str) -> String {
    static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

    WS_RE.replace_all(s.trim(), " ").into_owned()
}

/// Lowercase, replace punctuation with spaces and collapse whitespace.
///
/// Two strings that differ only in case, punctuation or spacing normalize
/// to the same value.
pub fn normalize_text(s: &str) -> String {
    let mapped: String = s
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .flat_map(char::to_lowercase)
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Distinct normalized tokens of `s`.
pub fn token_set(s: &str) -> HashSet<String> {
    normalize_text(s)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Topical keywords of `s` in first-seen order: normalized, stop words and
/// single characters removed, duplicates dropped.
pub fn keywords(s: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    normalize_text(s)
        .split(' ')
        .filter(|t| t.chars().count() > 1 && !STOP_WORDS.contains(t))
        .filter(|t| seen.insert(t.to_string()))
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_keeps_case_and_punctuation() {
        assert_eq!(
            collapse_whitespace("  Deep\n\tLearning:   A Survey "),
            "Deep Learning: A Survey"
        );
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize_text("CRISPR-Cas9,  gene   Editing!"), "crispr cas9 gene editing");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn keywords_drop_stop_words_and_duplicates() {
        let kws = keywords("The role of gut microbiota in the gut-brain axis");
        assert_eq!(kws, vec!["role", "gut", "microbiota", "brain", "axis"]);
    }

    #[test]
    fn token_set_is_distinct() {
        let set = token_set("a b a B");
        assert_eq!(set.len(), 2);
        assert!(set.contains("a"));
        assert!(set.contains("b"));
    }
}
