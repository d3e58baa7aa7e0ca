use std::{collections::HashMap, fmt, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{
    document::{BBOX_FORMAT_CORNERS, ContentData},
    error::{DppError, DppResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrProviderKind {
    AzureRead,
    Tesseract,
    PdfBox,
    InfyOcrEngine,
}

impl OcrProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AzureRead => "azure_read",
            Self::Tesseract => "tesseract",
            Self::PdfBox => "pdf_box",
            Self::InfyOcrEngine => "infy_ocr_engine",
        }
    }
}

impl fmt::Display for OcrProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrProviderConfig {
    pub kind: OcrProviderKind,
    /// Binary to invoke for CLI-backed engines. Defaults to the kind's usual name.
    #[serde(default)]
    pub executable: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub model_home_path: Option<PathBuf>,
}

impl OcrProviderConfig {
    pub fn tesseract() -> Self {
        Self {
            kind: OcrProviderKind::Tesseract,
            executable: None,
            languages: Vec::new(),
            model_home_path: None,
        }
    }

    pub fn executable(&self) -> &str {
        self.executable.as_deref().unwrap_or(match self.kind {
            OcrProviderKind::Tesseract => "tesseract",
            OcrProviderKind::PdfBox => "pdfbox",
            OcrProviderKind::InfyOcrEngine => "infy_ocr_engine",
            OcrProviderKind::AzureRead => "",
        })
    }

    pub fn validate(&self) -> DppResult<()> {
        if let Some(exe) = self.executable.as_deref() {
            if exe.trim().is_empty() {
                return Err(DppError::config(format!(
                    "ocr provider `{}` has an empty executable",
                    self.kind
                )));
            }
        }
        if self.languages.iter().any(|lang| lang.trim().is_empty()) {
            return Err(DppError::config(format!(
                "ocr provider `{}` lists an empty language",
                self.kind
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OcrRequest {
    pub file_path: PathBuf,
    /// Page number stamped on the returned lines when the engine has none.
    pub page: Option<u32>,
}

impl OcrRequest {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            page: None,
        }
    }
}

/// Text lines in reading order, boxes in corner form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrResponse {
    pub lines: Vec<ContentData>,
}

#[async_trait]
pub trait OcrProvider: Send + Sync {
    fn kind(&self) -> OcrProviderKind;

    async fn extract(&self, request: &OcrRequest) -> DppResult<OcrResponse>;
}

#[derive(Default, Clone)]
pub struct OcrProviderSet {
    providers: HashMap<OcrProviderKind, Arc<dyn OcrProvider>>,
}

impl OcrProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, provider: Arc<dyn OcrProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn OcrProvider>) -> Self {
        self.insert(provider);
        self
    }

    pub fn get(&self, kind: OcrProviderKind) -> DppResult<Arc<dyn OcrProvider>> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| DppError::config(format!("ocr provider `{kind}` is not configured")))
    }

    pub fn kinds(&self) -> Vec<OcrProviderKind> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

/// Builds the shipped backend for `config.kind`. Only tesseract has one;
/// other kinds must be inserted into the [`OcrProviderSet`] by the embedder.
pub fn build_ocr_provider(config: &OcrProviderConfig) -> DppResult<Arc<dyn OcrProvider>> {
    config.validate()?;
    match config.kind {
        OcrProviderKind::Tesseract => Ok(Arc::new(TesseractCliProvider::new(config.clone()))),
        other => Err(DppError::config(format!(
            "no built-in backend for ocr provider `{other}`"
        ))),
    }
}

pub struct TesseractCliProvider {
    config: OcrProviderConfig,
}

impl TesseractCliProvider {
    pub fn new(config: OcrProviderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl OcrProvider for TesseractCliProvider {
    fn kind(&self) -> OcrProviderKind {
        OcrProviderKind::Tesseract
    }

    async fn extract(&self, request: &OcrRequest) -> DppResult<OcrResponse> {
        let mut command = Command::new(self.config.executable());
        command.arg(&request.file_path).arg("stdout");
        if !self.config.languages.is_empty() {
            command.arg("-l").arg(self.config.languages.join("+"));
        }
        if let Some(model_home) = self.config.model_home_path.as_ref() {
            command.arg("--tessdata-dir").arg(model_home);
        }
        command.arg("tsv");

        debug!(file = %request.file_path.display(), "running tesseract");
        let output = command.output().await.map_err(|err| {
            DppError::provider(
                OcrProviderKind::Tesseract.as_str(),
                format!("failed to launch `{}`: {err}", self.config.executable()),
            )
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DppError::provider(
                OcrProviderKind::Tesseract.as_str(),
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let lines = parse_tesseract_tsv(&tsv, request.page);
        if lines.is_empty() {
            warn!(file = %request.file_path.display(), "tesseract found no text");
        }
        Ok(OcrResponse { lines })
    }
}

#[derive(Default)]
struct LineAccumulator {
    page: u32,
    words: Vec<String>,
    confidences: Vec<f64>,
    left: f64,
    top: f64,
    right: f64,
    bottom: f64,
}

/// Groups tesseract's word rows (level 5) into lines keyed by
/// page/block/paragraph/line, keeping first-seen order.
pub fn parse_tesseract_tsv(tsv: &str, default_page: Option<u32>) -> Vec<ContentData> {
    let mut order: Vec<(u32, u32, u32, u32)> = Vec::new();
    let mut lines: HashMap<(u32, u32, u32, u32), LineAccumulator> = HashMap::new();

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let text = cols[11..].join("\t");
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let ints: Option<Vec<u32>> = cols[1..5].iter().map(|c| c.parse().ok()).collect();
        let coords: Option<Vec<f64>> = cols[6..10].iter().map(|c| c.parse().ok()).collect();
        let (Some(ints), Some(coords)) = (ints, coords) else {
            continue;
        };
        let key = (ints[0], ints[1], ints[2], ints[3]);
        let (left, top, width, height) = (coords[0], coords[1], coords[2], coords[3]);

        let line = lines.entry(key).or_insert_with(|| {
            order.push(key);
            LineAccumulator {
                page: ints[0],
                left,
                top,
                right: left + width,
                bottom: top + height,
                ..LineAccumulator::default()
            }
        });
        line.left = line.left.min(left);
        line.top = line.top.min(top);
        line.right = line.right.max(left + width);
        line.bottom = line.bottom.max(top + height);
        line.words.push(text.to_string());
        if let Ok(conf) = cols[10].parse::<f64>() {
            if conf >= 0.0 {
                line.confidences.push(conf);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| lines.remove(&key))
        .map(|line| {
            let confidence_pct = (!line.confidences.is_empty()).then(|| {
                let mean = line.confidences.iter().sum::<f64>() / line.confidences.len() as f64;
                mean.round().clamp(0.0, 100.0) as u8
            });
            ContentData {
                content_type: Some("line".to_string()),
                content: Some(line.words.join(" ")),
                content_bbox: Some(vec![line.left, line.top, line.right, line.bottom]),
                bbox_format: Some(BBOX_FORMAT_CORNERS.to_string()),
                confidence_pct,
                page: default_page.or(Some(line.page)),
                handwritten: None,
                sequence: -1,
            }
        })
        .collect()
}
