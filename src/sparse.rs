//! Lexical sparse vector encoding via stable hashing (C3).
//!
//! Tokenization: ASCII-lowercase normalize, split on non-alphanumeric, drop
//! tokens shorter than 2 chars. Index = `Murmur3_32(token)`. Value = term
//! frequency. Capped at the top 256 terms by count, ties broken by smaller
//! index, and the result is sorted ascending by index.

use std::collections::HashMap;
use std::io::Cursor;

const MAX_TERMS: usize = 256;
const MIN_TOKEN_LEN: usize = 2;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

fn tokenize(text: &str) -> Vec<String> {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .map(|t| t.to_string())
        .collect()
}

fn murmur3_32(token: &str) -> u32 {
    murmur3::murmur3_32(&mut Cursor::new(token.as_bytes()), 0).expect("reading from a Cursor over an in-memory buffer cannot fail")
}

/// Encodes `text` into a sparse term-frequency vector keyed by stable
/// Murmur3_32 hashes of its normalized tokens.
pub fn sparse_encode(text: &str) -> SparseVector {
    let mut counts: HashMap<u32, f32> = HashMap::new();
    for token in tokenize(text) {
        let index = murmur3_32(&token);
        *counts.entry(index).or_insert(0.0) += 1.0;
    }

    let mut entries: Vec<(u32, f32)> = counts.into_iter().collect();
    // Top-256 by count descending, tie-break by smaller index ascending.
    entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));
    entries.truncate(MAX_TERMS);
    entries.sort_by_key(|(index, _)| *index);

    let (indices, values) = entries.into_iter().unzip();
    SparseVector { indices, values }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_strictly_ascending() {
        let v = sparse_encode("the quick brown fox jumps over the lazy dog the fox runs");
        for pair in v.indices.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn term_frequency_is_counted_correctly() {
        let v = sparse_encode("apple apple banana");
        let apple_index = murmur3_32("apple");
        let banana_index = murmur3_32("banana");
        let apple_pos = v.indices.iter().position(|&i| i == apple_index).unwrap();
        let banana_pos = v.indices.iter().position(|&i| i == banana_index).unwrap();
        assert_eq!(v.values[apple_pos], 2.0);
        assert_eq!(v.values[banana_pos], 1.0);
    }

    #[test]
    fn short_and_non_alphanumeric_tokens_are_dropped() {
        let v = sparse_encode("a an I, it's!! ok");
        // "a", "an", "i", "t", "s", "ok" -> "an" len 2 kept, "ok" len 2 kept, "a"/"i"/"t"/"s" dropped (len 1)
        assert!(v.indices.len() <= 2);
    }

    #[test]
    fn caps_at_256_unique_terms() {
        let text: String = (0..500).map(|i| format!("tok{i} ")).collect();
        let v = sparse_encode(&text);
        assert!(v.indices.len() <= 256);
        assert_eq!(v.indices.len(), v.values.len());
    }

    #[test]
    fn empty_text_yields_empty_vector() {
        let v = sparse_encode("");
        assert!(v.indices.is_empty());
        assert!(v.values.is_empty());
    }

    #[test]
    fn hash_is_stable_across_calls() {
        assert_eq!(murmur3_32("hello"), murmur3_32("hello"));
    }
}
