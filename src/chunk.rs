//! Paragraph-first text chunker with token overlap.
//!
//! Splits a paper's cleaned text into [`Chunk`]s of at most
//! `chunk_size_tokens` tokens. A token is a maximal run of non-whitespace
//! characters, so counts are exact and independent of any model tokenizer.
//!
//! Segmentation works top-down:
//!
//! 1. Paragraphs (separated by blank lines) are the preferred unit.
//! 2. A paragraph over budget is split at sentence ends (`.`, `!`, `?`).
//! 3. A sentence still over budget is cut into windows of
//!    `chunk_size_tokens - overlap_tokens` tokens.
//!
//! Segments are packed greedily. When the next segment does not fit, the
//! current chunk is emitted and the next one is seeded with the trailing
//! `overlap_tokens` tokens of the emitted chunk, shrunk only when the seed
//! plus the incoming segment would exceed the budget.
//!
//! Chunk ids are `{paper_id}:{index}` and each chunk carries a SHA-256 hash
//! of its text. Output is a pure function of the inputs.

use sha2::{Digest, Sha256};

use crate::error::ChunkingError;
use crate::models::Chunk;

/// A token tagged with the paragraph it came from.
type Token<'a> = (&'a str, usize);

/// Split `text` into overlapping chunks with contiguous indices from 0.
pub fn chunk_text(
    paper_id: &str,
    text: &str,
    chunk_size_tokens: usize,
    overlap_tokens: usize,
) -> Result<Vec<Chunk>, ChunkingError> {
    if chunk_size_tokens == 0 || overlap_tokens >= chunk_size_tokens {
        return Err(ChunkingError::InvalidParameters {
            chunk_size: chunk_size_tokens,
            overlap: overlap_tokens,
        });
    }

    let paragraphs = split_paragraphs(text);
    if paragraphs.is_empty() {
        return Err(ChunkingError::EmptyText);
    }

    let mut segments: Vec<Vec<Token>> = Vec::new();
    for (p, words) in paragraphs.iter().enumerate() {
        if words.len() <= chunk_size_tokens {
            segments.push(words.iter().map(|w| (*w, p)).collect());
            continue;
        }
        for sentence in split_sentences(words) {
            if sentence.len() <= chunk_size_tokens {
                segments.push(sentence.iter().map(|w| (*w, p)).collect());
            } else {
                for window in sentence.chunks(chunk_size_tokens - overlap_tokens) {
                    segments.push(window.iter().map(|w| (*w, p)).collect());
                }
            }
        }
    }

    let mut chunks = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut current_overlap = 0usize;

    for segment in segments {
        if !current.is_empty() && current.len() + segment.len() > chunk_size_tokens {
            chunks.push(make_chunk(paper_id, chunks.len(), &current, current_overlap));

            let seed = overlap_tokens
                .min(chunk_size_tokens - segment.len())
                .min(current.len());
            current.drain(..current.len() - seed);
            current_overlap = seed;
        }
        current.extend(segment);
    }

    if current.len() > current_overlap {
        chunks.push(make_chunk(paper_id, chunks.len(), &current, current_overlap));
    }

    Ok(chunks)
}

/// Rebuild the source text from a chunk sequence by dropping each chunk's
/// overlap prefix. Equal to the original up to whitespace normalization.
pub fn reconstruct_text(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| skip_tokens(&c.text, c.overlap_tokens))
        .filter(|rest| !rest.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Number of tokens in `text` under the chunker's token model.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

fn split_paragraphs(text: &str) -> Vec<Vec<&str>> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
        } else {
            current.extend(line.split_whitespace());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    paragraphs
}

fn split_sentences<'a, 'w>(words: &'w [&'a str]) -> Vec<&'w [&'a str]> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (i, word) in words.iter().enumerate() {
        if word.ends_with(['.', '!', '?']) {
            sentences.push(&words[start..=i]);
            start = i + 1;
        }
    }
    if start < words.len() {
        sentences.push(&words[start..]);
    }
    sentences
}

fn render(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut last_paragraph = None;
    for (word, paragraph) in tokens {
        match last_paragraph {
            None => {}
            Some(p) if p == *paragraph => out.push(' '),
            Some(_) => out.push_str("\n\n"),
        }
        out.push_str(word);
        last_paragraph = Some(*paragraph);
    }
    out
}

fn skip_tokens(text: &str, n: usize) -> &str {
    let mut rest = text.trim_start();
    for _ in 0..n {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        rest = rest[end..].trim_start();
    }
    rest
}

fn make_chunk(paper_id: &str, index: usize, tokens: &[Token], overlap_tokens: usize) -> Chunk {
    let text = render(tokens);

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}:{}", paper_id, index),
        paper_id: paper_id.to_string(),
        index,
        text,
        token_count: tokens.len(),
        overlap_tokens,
        hash,
    }
}
