//! Seams for external OCR and LLM backends.

use std::sync::Arc;

pub mod llm;
pub mod ocr;

pub use llm::{
    LlmProvider, LlmProviderConfig, LlmRequestData, LlmResponseData, OpenAiFormatLlmProvider,
    render_prompt,
};
pub use ocr::{
    OcrProvider, OcrProviderConfig, OcrProviderKind, OcrProviderSet, OcrRequest, OcrResponse,
    TesseractCliProvider, build_ocr_provider, parse_tesseract_tsv,
};

use crate::error::{DppError, DppResult};

/// Backends available to processors, shared read-only across the run.
#[derive(Clone, Default)]
pub struct ProviderSet {
    pub ocr: OcrProviderSet,
    pub llm: Option<Arc<dyn LlmProvider>>,
}

impl ProviderSet {
    pub fn llm(&self) -> DppResult<Arc<dyn LlmProvider>> {
        self.llm
            .clone()
            .ok_or_else(|| DppError::config("no llm provider is configured"))
    }
}
