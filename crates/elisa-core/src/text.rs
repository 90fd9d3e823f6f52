//! Keyword tokenization shared by the judge and the build memory.

use std::collections::HashSet;

use once_cell::sync::Lazy;

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have",
        "in", "into", "is", "it", "its", "of", "on", "or", "our", "should", "so", "than", "that",
        "the", "their", "then", "there", "these", "they", "this", "to", "use", "user", "when",
        "which", "will", "with", "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Lowercased alphanumeric tokens, minimum three characters, stopwords
/// removed. Order preserved; duplicates kept (callers dedupe as needed).
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|token| token.len() >= 3 && !STOPWORDS.contains(token.as_str()))
        .collect()
}

/// De-duplicated tokens, insertion order preserved.
pub fn unique_tokens(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

/// Jaccard similarity of two keyword sets.
pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let set_a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let set_b: HashSet<&str> = b.iter().map(String::as_str).collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_filters_stopwords_and_short_tokens() {
        let tokens = tokenize("Build a counter that increments the count by 1");
        assert!(tokens.contains(&"counter".to_string()));
        assert!(tokens.contains(&"increments".to_string()));
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"by".to_string()));
    }

    #[test]
    fn unique_tokens_dedupe_in_order() {
        let tokens = unique_tokens("count count counter count");
        assert_eq!(tokens, vec!["count", "counter"]);
    }

    #[test]
    fn jaccard_bounds() {
        let a = vec!["red".to_string(), "green".to_string()];
        let b = vec!["green".to_string(), "blue".to_string()];
        let sim = jaccard(&a, &b);
        assert!(sim > 0.0 && sim < 1.0);
        assert_eq!(jaccard(&a, &a), 1.0);
        assert_eq!(jaccard(&a, &[]), 0.0);
    }
}
