use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::write_context;
use crate::{
    document::{ContentData, ContextData, DocumentData, MessageItem, ProcessResponse, SegmentData},
    error::{DppError, DppResult},
    pipeline::{BuildContext, Processor, parse_processor_config},
    text::{
        ChunkConfig, Chunker, TiktokenTokenizer, Tokenizer, TokenizerChunker, WhitespaceTokenizer,
        compute_mdhash_id,
    },
};

pub const PROCESSOR_ID: &str = "segmenter";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    #[default]
    O200kBase,
    Whitespace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmenterConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub split_by_character: Option<String>,
    #[serde(default)]
    pub split_by_character_only: bool,
    #[serde(default)]
    pub tokenizer: TokenizerKind,
}

fn default_chunk_size() -> usize {
    500
}

fn default_chunk_overlap() -> usize {
    50
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            split_by_character: None,
            split_by_character_only: false,
            tokenizer: TokenizerKind::default(),
        }
    }
}

impl SegmenterConfig {
    fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            max_tokens: self.chunk_size,
            overlap_tokens: self.chunk_overlap,
            split_by_character: self.split_by_character.clone(),
            split_by_character_only: self.split_by_character_only,
        }
    }
}

/// Splits the extracted lines of each page into token-bounded segments.
pub struct Segmenter {
    config: SegmenterConfig,
    chunker: Arc<dyn Chunker>,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> DppResult<Self> {
        config
            .chunk_config()
            .validate()
            .map_err(|err| DppError::config(format!("segmenter: {err}")))?;
        let tokenizer: Arc<dyn Tokenizer> = match config.tokenizer {
            TokenizerKind::O200kBase => {
                Arc::new(TiktokenTokenizer::new().map_err(|err| DppError::Dependency {
                    name: "tiktoken o200k_base".into(),
                    detail: err.to_string(),
                })?)
            }
            TokenizerKind::Whitespace => Arc::new(WhitespaceTokenizer::new()),
        };
        Ok(Self {
            config,
            chunker: Arc::new(TokenizerChunker::new(tokenizer)),
        })
    }

    pub fn factory(_context: &BuildContext, config: &Value) -> DppResult<Arc<dyn Processor>> {
        let config = parse_processor_config(PROCESSOR_ID, config)?;
        Ok(Arc::new(Self::new(config)?))
    }

    fn segment(&self, document_id: &str, lines: &[ContentData]) -> DppResult<Vec<SegmentData>> {
        let mut ordered: Vec<&ContentData> = lines
            .iter()
            .filter(|line| line.content.as_deref().is_some_and(|c| !c.trim().is_empty()))
            .collect();
        ordered.sort_by_key(|line| (line.page.unwrap_or(0), line.sequence));

        let chunk_config = self.config.chunk_config();
        let mut segments = Vec::new();
        for page_lines in ordered.chunk_by(|a, b| a.page == b.page) {
            let page = page_lines[0].page;
            let text = page_lines
                .iter()
                .filter_map(|line| line.content.as_deref())
                .collect::<Vec<_>>()
                .join("\n");

            let chunks = self
                .chunker
                .chunk(&text, &chunk_config)
                .map_err(|err| DppError::validation("/raw_data/other_data", err.to_string()))?;

            for chunk in chunks {
                let sequence = segments.len() as u32;
                let source_sequences = page_lines
                    .iter()
                    .filter(|line| {
                        line.content
                            .as_deref()
                            .is_some_and(|c| chunk.content.contains(c.trim()))
                    })
                    .map(|line| line.sequence)
                    .collect();
                segments.push(SegmentData {
                    segment_id: compute_mdhash_id(
                        &format!("{document_id}:{sequence}:{}", chunk.content),
                        "seg-",
                    ),
                    content: chunk.content,
                    sequence,
                    page,
                    token_count: chunk.token_count as u32,
                    source_sequences,
                });
            }
        }
        Ok(segments)
    }
}

#[async_trait]
impl Processor for Segmenter {
    fn processor_id(&self) -> &str {
        PROCESSOR_ID
    }

    async fn do_process(
        &self,
        mut document: DocumentData,
        mut context: ContextData,
    ) -> DppResult<ProcessResponse> {
        let document_id = document.document_id().unwrap_or_default().to_string();
        let segments = self.segment(&document_id, &document.raw_data.other_data)?;
        let count = segments.len();
        debug!(doc_id = %document_id, segments = count, "document segmented");
        document.replace_segments(segments);

        let mut values = Map::new();
        values.insert("segment_count".into(), Value::from(count));
        write_context(&mut context, PROCESSOR_ID, values);

        let mut response = ProcessResponse::new(document, context);
        if count == 0 {
            response = response.with_message(MessageItem::warning("no content to segment"));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str, page: u32) -> ContentData {
        ContentData {
            content: Some(text.into()),
            page: Some(page),
            ..ContentData::default()
        }
    }

    #[tokio::test]
    async fn segments_follow_page_and_sequence_order() {
        let segmenter = Segmenter::new(SegmenterConfig {
            chunk_size: 4,
            chunk_overlap: 0,
            tokenizer: TokenizerKind::Whitespace,
            ..SegmenterConfig::default()
        })
        .unwrap();

        let mut document = DocumentData::new("doc-1");
        document.append_content([line("page two text", 2), line("alpha beta", 1)]);
        document.append_content([line("gamma", 1)]);

        let response = segmenter
            .do_process(document, ContextData::new())
            .await
            .unwrap();
        let segments = response.document_data.segments();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].page, Some(1));
        assert_eq!(segments[0].content, "alpha beta gamma");
        assert_eq!(segments[0].source_sequences, vec![1, 2]);
        assert_eq!(segments[1].page, Some(2));
        assert_eq!(segments[1].sequence, 1);
        assert_ne!(segments[0].segment_id, segments[1].segment_id);
    }

    #[test]
    fn overlap_not_smaller_than_size_is_rejected() {
        let result = Segmenter::new(SegmenterConfig {
            chunk_size: 10,
            chunk_overlap: 10,
            tokenizer: TokenizerKind::Whitespace,
            ..SegmenterConfig::default()
        });
        assert!(matches!(result, Err(DppError::Configuration(_))));
    }
}
