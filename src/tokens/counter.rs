//! Token accounting
//!
//! OpenAI-family models are counted exactly with tiktoken-rs; every other
//! provider uses a character heuristic. Encoders are expensive to build, so
//! they are cached per model id and shared across requests.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tiktoken_rs::{cl100k_base, get_bpe_from_model, CoreBPE};

use crate::types::ProviderVariant;

/// Counting strategy for one provider/model pair
#[derive(Clone)]
pub enum TokenAccountant {
    /// Exact BPE tokenizer
    Bpe(Arc<CoreBPE>),
    /// Character heuristic for non-OpenAI vendors
    Heuristic,
}

impl std::fmt::Debug for TokenAccountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenAccountant::Bpe(_) => f.write_str("TokenAccountant::Bpe"),
            TokenAccountant::Heuristic => f.write_str("TokenAccountant::Heuristic"),
        }
    }
}

impl TokenAccountant {
    /// Count tokens in a text string
    pub fn count(&self, text: &str) -> u64 {
        match self {
            TokenAccountant::Bpe(encoder) => encoder.encode_with_special_tokens(text).len() as u64,
            TokenAccountant::Heuristic => heuristic_count(text),
        }
    }

    /// Count prompt tokens over `messages[*].content` of an outbound body
    ///
    /// Bodies without a `messages` array (Anthropic prompt, Gemini contents)
    /// fall back to the `prompt` string or the Gemini text parts.
    pub fn count_outbound(&self, body: &Value) -> u64 {
        if let Some(messages) = body.get("messages").and_then(Value::as_array) {
            return messages
                .iter()
                .filter_map(|m| m.get("content").and_then(Value::as_str))
                .map(|content| self.count(content))
                .sum();
        }

        if let Some(prompt) = body.get("prompt").and_then(Value::as_str) {
            return self.count(prompt);
        }

        body.get("contents")
            .and_then(Value::as_array)
            .map(|contents| {
                contents
                    .iter()
                    .filter_map(|c| c.get("parts").and_then(Value::as_array))
                    .flatten()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .map(|text| self.count(text))
                    .sum()
            })
            .unwrap_or(0)
    }
}

/// Heuristic token count
///
/// Every non-whitespace character counts as one token (CJK ideographs,
/// ASCII letters, digits and punctuation alike) and each boundary between
/// whitespace-separated words adds one more.
pub fn heuristic_count(text: &str) -> u64 {
    let mut words = 0u64;
    let mut chars = 0u64;

    for word in text.split_whitespace() {
        words += 1;
        chars += word.chars().count() as u64;
    }

    chars + words.saturating_sub(1)
}

/// Cache of BPE encoders keyed by model id
///
/// Uses a RwLock so concurrent requests for already-loaded models only take
/// the read side.
#[derive(Clone, Default)]
pub struct SharedTokenCounter {
    encoders: Arc<RwLock<HashMap<String, Arc<CoreBPE>>>>,
}

impl SharedTokenCounter {
    /// Create an empty encoder cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the accountant for a provider variant and model id
    pub fn for_provider(&self, variant: ProviderVariant, model: &str) -> TokenAccountant {
        if !variant.is_openai_family() {
            return TokenAccountant::Heuristic;
        }

        match self.encoder(model) {
            Some(encoder) => TokenAccountant::Bpe(encoder),
            None => TokenAccountant::Heuristic,
        }
    }

    /// Get or create the encoder for a model
    fn encoder(&self, model: &str) -> Option<Arc<CoreBPE>> {
        if let Ok(encoders) = self.encoders.read() {
            if let Some(encoder) = encoders.get(model) {
                return Some(encoder.clone());
            }
        }

        let encoder = match get_bpe_from_model(model) {
            Ok(e) => e,
            Err(e) => {
                // Fall back to cl100k_base for unknown models
                tracing::debug!(
                    model = %model,
                    error = %e,
                    "Unknown model, falling back to cl100k_base encoder"
                );
                match cl100k_base() {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "cl100k_base encoder unavailable, using heuristic counter"
                        );
                        return None;
                    }
                }
            }
        };

        let encoder = Arc::new(encoder);
        match self.encoders.write() {
            Ok(mut encoders) => {
                encoders
                    .entry(model.to_string())
                    .or_insert_with(|| encoder.clone());
            }
            Err(e) => tracing::warn!(error = %e, "Token counter cache lock poisoned"),
        }

        Some(encoder)
    }
}
