use std::sync::Arc;

use anyhow::{Result, anyhow};

use super::tokenizer::{Tokenizer, compute_mdhash_id};

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub order: usize,
    pub token_count: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub split_by_character: Option<String>,
    pub split_by_character_only: bool,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            overlap_tokens: 50,
            split_by_character: None,
            split_by_character_only: false,
        }
    }
}

impl ChunkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(anyhow!("max_tokens must be greater than zero"));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(anyhow!(
                "overlap_tokens ({}) must be smaller than max_tokens ({})",
                self.overlap_tokens,
                self.max_tokens
            ));
        }
        Ok(())
    }
}

pub trait Chunker: Send + Sync {
    fn chunk(&self, content: &str, config: &ChunkConfig) -> Result<Vec<Chunk>>;
}

#[derive(Clone)]
pub struct TokenizerChunker {
    tokenizer: Arc<dyn Tokenizer>,
}

impl TokenizerChunker {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }
}

impl Chunker for TokenizerChunker {
    fn chunk(&self, content: &str, config: &ChunkConfig) -> Result<Vec<Chunk>> {
        config.validate()?;

        let pieces = chunking_by_token_size(self.tokenizer.as_ref(), content, config)?;
        Ok(pieces
            .into_iter()
            .filter(|(_, text)| !text.is_empty())
            .enumerate()
            .map(|(order, (token_count, content))| Chunk {
                id: compute_mdhash_id(&content, "chunk-"),
                content,
                order,
                token_count,
            })
            .collect())
    }
}

/// Splits `content` into windows of at most `max_tokens` tokens, stepping
/// by `max_tokens - overlap_tokens`. With a delimiter, pieces are split on
/// it first and only oversized pieces are windowed (unless
/// `split_by_character_only`).
fn chunking_by_token_size(
    tokenizer: &dyn Tokenizer,
    content: &str,
    config: &ChunkConfig,
) -> Result<Vec<(usize, String)>> {
    let step = config.max_tokens - config.overlap_tokens;
    let mut results = Vec::new();

    let window = |tokens: &[u32], out: &mut Vec<(usize, String)>| -> Result<()> {
        let mut start = 0usize;
        while start < tokens.len() {
            let end = (start + config.max_tokens).min(tokens.len());
            let text = tokenizer.decode(&tokens[start..end])?;
            out.push((end - start, text.trim().to_string()));
            if end == tokens.len() {
                break;
            }
            start += step;
        }
        Ok(())
    };

    match config.split_by_character.as_deref() {
        Some(delimiter) => {
            for piece in content.split(delimiter) {
                let tokens = tokenizer.encode(piece);
                if config.split_by_character_only || tokens.len() <= config.max_tokens {
                    results.push((tokens.len(), piece.trim().to_string()));
                } else {
                    window(&tokens, &mut results)?;
                }
            }
        }
        None => {
            let tokens = tokenizer.encode(content);
            window(&tokens, &mut results)?;
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::WhitespaceTokenizer;

    fn chunker() -> TokenizerChunker {
        TokenizerChunker::new(Arc::new(WhitespaceTokenizer::new()))
    }

    #[test]
    fn windows_overlap_by_configured_amount() {
        let config = ChunkConfig {
            max_tokens: 4,
            overlap_tokens: 1,
            ..ChunkConfig::default()
        };
        let chunks = chunker().chunk("a b c d e f g", &config).unwrap();
        let contents: Vec<_> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["a b c d", "d e f g"]);
        assert_eq!(chunks[1].order, 1);
    }

    #[test]
    fn delimiter_split_keeps_small_pieces_whole() {
        let config = ChunkConfig {
            max_tokens: 10,
            overlap_tokens: 2,
            split_by_character: Some("\n\n".into()),
            split_by_character_only: false,
        };
        let chunks = chunker().chunk("one two\n\nthree", &config).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].content, "three");
        assert_eq!(chunks[1].token_count, 1);
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let config = ChunkConfig {
            max_tokens: 2,
            overlap_tokens: 2,
            ..ChunkConfig::default()
        };
        assert!(chunker().chunk("a b c", &config).is_err());
    }
}
