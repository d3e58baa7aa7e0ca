use std::{collections::HashMap, sync::Mutex};

use anyhow::{Result, anyhow};
use sha2::{Digest, Sha256};
use tiktoken_rs::{CoreBPE, o200k_base};

pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<u32>;
    fn decode(&self, tokens: &[u32]) -> Result<String>;
}

pub struct TiktokenTokenizer {
    bpe: CoreBPE,
}

impl TiktokenTokenizer {
    pub fn new() -> Result<Self> {
        let bpe = o200k_base()?;
        Ok(Self { bpe })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe.encode_with_special_tokens(text)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.bpe.decode(tokens.to_vec())
    }
}

/// Treats every whitespace-separated word as one token. Decoding joins
/// words with a single space.
#[derive(Default)]
pub struct WhitespaceTokenizer {
    vocab: Mutex<Vocab>,
}

#[derive(Default)]
struct Vocab {
    ids: HashMap<String, u32>,
    words: Vec<String>,
}

impl WhitespaceTokenizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tokenizer for WhitespaceTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        let mut vocab = self.vocab.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        text.split_whitespace()
            .map(|word| {
                if let Some(id) = vocab.ids.get(word) {
                    return *id;
                }
                let id = vocab.words.len() as u32;
                vocab.words.push(word.to_string());
                vocab.ids.insert(word.to_string(), id);
                id
            })
            .collect()
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        let vocab = self.vocab.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let words = tokens
            .iter()
            .map(|id| {
                vocab
                    .words
                    .get(*id as usize)
                    .map(String::as_str)
                    .ok_or_else(|| anyhow!("unknown token id {id}"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(words.join(" "))
    }
}

/// Content-hash identifier: `prefix` + hex sha256 of `content`.
pub fn compute_mdhash_id(content: &str, prefix: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("{prefix}{digest:x}")
}
