//! Topic-exchange binding semantics.

/// Match a `.`-separated routing key against a topic binding.
///
/// - `*` matches exactly one word
/// - `#` matches zero or more words
/// - anything else matches the word literally
pub fn topic_matches(binding: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = binding.split('.').collect();
    let words: Vec<&str> = routing_key.split('.').collect();
    matches_from(&pattern, &words)
}

fn matches_from(pattern: &[&str], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => (0..=words.len()).any(|skip| matches_from(rest, &words[skip..])),
        Some((&"*", rest)) => !words.is_empty() && matches_from(rest, &words[1..]),
        Some((literal, rest)) => {
            words.first().is_some_and(|w| w == literal) && matches_from(rest, &words[1..])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("stock.confirmed", "stock.confirmed"));
        assert!(!topic_matches("stock.confirmed", "stock.rejected"));
        assert!(!topic_matches("stock", "stock.confirmed"));
    }

    #[test]
    fn test_star_matches_one_word() {
        assert!(topic_matches("payment.*", "payment.failed"));
        assert!(!topic_matches("payment.*", "payment"));
        assert!(!topic_matches("*.confirmed", "order.stock.confirmed"));
    }

    #[test]
    fn test_hash_matches_zero_or_more_words() {
        assert!(topic_matches("#", "order.created"));
        assert!(topic_matches("order.#", "order"));
        assert!(topic_matches("order.#", "order.stock-returned"));
        assert!(topic_matches("#.confirmed", "order.stock.confirmed"));
        assert!(!topic_matches("order.#", "stock.confirmed"));
    }
}
