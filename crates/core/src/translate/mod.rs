//! Translation backend contract and text preparation.
//!
//! The machine-translation service itself lives outside the engine; it is
//! injected as a [`TranslationBackend`]. This module owns everything the
//! engine does to text before and after the backend call: sanitation,
//! sentence-boundary chunking, and rejoining.

pub mod grouper;

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::error::Result;

pub use grouper::SpanRouter;

/// A pluggable translation capability. Called synchronously from page
/// workers; any failure is treated as "reuse the input text".
pub trait TranslationBackend: Send + Sync {
    fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;
}

/// Backend that returns its input unchanged. Useful for tests and for
/// exercising the rewrite pipeline offline.
#[derive(Debug, Default)]
pub struct IdentityTranslator;

impl TranslationBackend for IdentityTranslator {
    fn translate(&self, text: &str, _source_lang: &str, _target_lang: &str) -> Result<String> {
        Ok(text.to_string())
    }
}

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Cleans a unit before submission: strips non-whitespace control
/// characters, collapses whitespace runs (tabs and newlines included) to
/// single spaces, trims, and normalizes to NFC.
pub fn sanitize(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .nfc()
        .collect();
    WHITESPACE_RUN.replace_all(&stripped, " ").trim().to_string()
}

/// Splits sanitized text into chunks no longer than `max_len` characters,
/// preferring sentence boundaries, so long units respect backend limits.
/// A single sentence longer than `max_len` is emitted as its own chunk
/// rather than split mid-sentence.
pub fn chunk_sentences(text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 || text.chars().count() <= max_len {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    for sentence in split_sentences(text) {
        let sentence_len = sentence.chars().count();
        if current_len > 0 && current_len + 1 + sentence_len > max_len {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(sentence);
        current_len += sentence_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Splits on sentence-final punctuation followed by whitespace. Covers
/// Latin terminators and the CJK full-width set.
fn split_sentences(text: &str) -> Vec<&str> {
    static BOUNDARY: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?s)(.*?[.!?\u{3002}\u{FF01}\u{FF1F}])\s+").unwrap());
    let mut out = Vec::new();
    let mut last = 0;
    for caps in BOUNDARY.captures_iter(text) {
        let m = caps.get(1).unwrap();
        out.push(m.as_str());
        last = caps.get(0).unwrap().end();
    }
    if last < text.len() {
        let tail = text[last..].trim();
        if !tail.is_empty() {
            out.push(tail);
        }
    }
    out
}

/// Translates one sanitized unit, chunking long text at sentence
/// boundaries, translating chunks independently, and rejoining with a
/// single space. Errors propagate to the caller, which falls back to the
/// source text.
pub fn translate_chunked(
    backend: &dyn TranslationBackend,
    text: &str,
    source_lang: &str,
    target_lang: &str,
    max_len: usize,
) -> Result<String> {
    let mut parts = Vec::new();
    for chunk in chunk_sentences(text, max_len) {
        let translated = backend.translate(&chunk, source_lang, target_lang)?;
        if !translated.is_empty() {
            parts.push(translated);
        }
    }
    Ok(parts.join(" "))
}
