use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::prompts::OcrMode;

/// Flat OCR result as returned by the OCR function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrResult {
    pub extracted_text: String,
    pub processing_time_ms: u64,
    pub word_count: u64,
    pub character_count: u64,
    pub confidence_note: String,
}

impl OcrResult {
    pub fn from_extraction(text: &str, mode: OcrMode, started: Instant) -> Self {
        let text = text.trim();
        let elapsed = started.elapsed().as_millis();
        Self {
            extracted_text: text.to_string(),
            processing_time_ms: u64::try_from(elapsed).unwrap_or(u64::MAX),
            word_count: word_count(text),
            character_count: character_count(text),
            confidence_note: mode.confidence_note().to_string(),
        }
    }
}

pub fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

pub fn character_count(text: &str) -> u64 {
    text.chars().count() as u64
}
