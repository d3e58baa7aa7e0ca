//! Token-based text chunking for the segmentation stage.

pub mod chunker;
pub mod tokenizer;

pub use chunker::{Chunk, ChunkConfig, Chunker, TokenizerChunker};
pub use tokenizer::{TiktokenTokenizer, Tokenizer, WhitespaceTokenizer, compute_mdhash_id};
