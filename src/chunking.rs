//! Token-aware windowed chunker (C2).
//!
//! Approximates a CL100K-style BPE tokenizer by treating maximal runs of
//! non-whitespace characters as tokens.

#[derive(Debug, Clone, Copy)]
struct TokenSpan {
    start: usize,
    end: usize,
}

fn tokenize(text: &str) -> Vec<TokenSpan> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push(TokenSpan { start: s, end: idx });
            }
        } else if start.is_none() {
            start = Some(idx);
        }
    }
    if let Some(s) = start {
        spans.push(TokenSpan { start: s, end: text.len() });
    }
    spans
}

/// Splits `text` into an ordered sequence of token windows of at most
/// `max_tokens` tokens, each window starting `max_tokens - overlap_tokens`
/// tokens after the previous one. The final window always ends at
/// end-of-text. Panics if `overlap_tokens >= max_tokens` or `max_tokens ==
/// 0` — these are programmer errors, not runtime conditions.
pub fn chunk(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    assert!(max_tokens > 0, "max_tokens must be > 0");
    assert!(overlap_tokens < max_tokens, "overlap must be < max_tokens");

    let tokens = tokenize(text);
    if tokens.is_empty() {
        return Vec::new();
    }

    let step = max_tokens - overlap_tokens;
    let mut windows = Vec::new();
    let mut token_start = 0usize;

    loop {
        let token_end = (token_start + max_tokens).min(tokens.len());
        let start_byte = tokens[token_start].start;
        let end_byte = if token_end == tokens.len() {
            text.len()
        } else {
            tokens[token_end - 1].end
        };
        windows.push(text[start_byte..end_byte].to_string());

        if token_end >= tokens.len() {
            break;
        }
        token_start += step;
    }

    windows
}

/// Returns the substring made of the last `n` tokens of `text`, used to
/// truncate prompts to an input-character budget (C14).
pub fn keep_last_tokens(text: &str, n: usize) -> String {
    let tokens = tokenize(text);
    if tokens.len() <= n || n == 0 {
        return text.to_string();
    }
    let start_idx = tokens.len() - n;
    text[tokens[start_idx].start..].to_string()
}

/// Token count, for callers that need the budget check without chunking.
pub fn count_tokens(text: &str) -> usize {
    tokenize(text).len()
}
