//! Small text helpers shared by the chunker, the sparse scorer and the
//! retrieval layer.

use std::collections::HashSet;

/// Lowercase alphanumeric tokens, in order of appearance.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard similarity of the token sets of `a` and `b`.
///
/// Two empty texts are considered unrelated (0.0), not identical.
pub fn jaccard(a: &str, b: &str) -> f32 {
    let a: HashSet<String> = tokenize(a).into_iter().collect();
    let b: HashSet<String> = tokenize(b).into_iter().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f32 / union as f32
}

/// Fraction of `needle`'s distinct tokens that occur in `haystack`.
pub fn term_overlap(needle: &str, haystack: &str) -> f32 {
    let needle: HashSet<String> = tokenize(needle).into_iter().collect();
    if needle.is_empty() {
        return 0.0;
    }
    let haystack: HashSet<String> = tokenize(haystack).into_iter().collect();
    needle.intersection(&haystack).count() as f32 / needle.len() as f32
}

/// The first `max_chars` characters of `text`, on a char boundary.
pub fn prefix_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Box<dyn Error> + Send!"),
            vec!["box", "dyn", "error", "send"]
        );
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard("a b", "a b"), 1.0);
        assert_eq!(jaccard("a b", "b c"), 1.0 / 3.0);
        assert_eq!(jaccard("", ""), 0.0);
    }

    #[test]
    fn test_term_overlap_is_directional() {
        assert_eq!(term_overlap("async", "async await runtime"), 1.0);
        assert_eq!(term_overlap("async await runtime", "async"), 1.0 / 3.0);
    }

    #[test]
    fn test_prefix_chars_respects_char_boundaries() {
        assert_eq!(prefix_chars("héllo", 2), "hé");
        assert_eq!(prefix_chars("hi", 10), "hi");
    }
}
