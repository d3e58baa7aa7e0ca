//! The document-data record that flows through every pipeline stage.
//!
//! A [`DocumentData`] is created by the request creator, enriched by the
//! extraction/segmentation/metadata stages, rewritten field-by-field by the
//! document-data updater, and finally closed and persisted by the request
//! closer. Stage-owned areas are only written through the methods below.

use std::{collections::BTreeMap, path::Path};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{DppError, DppResult};

pub mod message;
pub mod raw_data;
pub mod response;

pub use message::{MessageCode, MessageItem};
pub use raw_data::{
    BBOX_FORMAT_CORNERS, BBOX_FORMAT_ORIGIN_SIZE, CellData, ContentData, KeyValueData, RawData,
    TableData,
};
pub use response::{ContextData, FlowControl, ProcessResponse, WorkItem};

#[derive(Default, Clone, Debug, PartialEq, Deserialize, Serialize, TS)]
#[ts(export)]
pub struct ValueData {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_pct: Option<u8>,
}

impl ValueData {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            confidence_pct: None,
        }
    }
}

#[derive(Default, Clone, Debug, PartialEq, Deserialize, Serialize, TS)]
#[ts(export)]
pub struct StandardData {
    pub filepath: ValueData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<ValueData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<ValueData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<ValueData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_dtm: Option<ValueData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_dtm: Option<ValueData>,
}

impl StandardData {
    /// Derives file name, size, mime type and timestamps from the source
    /// path. Missing file metadata leaves the corresponding fields empty.
    pub fn from_path(path: &Path, metadata: Option<&std::fs::Metadata>) -> Self {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(ValueData::new);
        let mime_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(guess_mime_type)
            .map(ValueData::new);

        let (size, created_dtm, modified_dtm) = match metadata {
            Some(meta) => (
                Some(ValueData::new(human_readable_size(meta.len()))),
                meta.created().ok().map(format_system_time).map(ValueData::new),
                meta.modified().ok().map(format_system_time).map(ValueData::new),
            ),
            None => (None, None, None),
        };

        Self {
            filepath: ValueData::new(path.to_string_lossy()),
            filename,
            size,
            mime_type,
            created_dtm,
            modified_dtm,
        }
    }
}

#[derive(Default, Clone, Debug, PartialEq, Deserialize, Serialize, TS)]
#[ts(export)]
pub struct MetaData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_data: Option<StandardData>,
    /// Per-field annotations produced by the metadata extractor.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extracted: BTreeMap<String, ValueData>,
}

#[derive(Default, Clone, Debug, PartialEq, Deserialize, Serialize, TS)]
#[ts(export)]
pub struct SegmentData {
    pub segment_id: String,
    pub content: String,
    pub sequence: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub token_count: u32,
    /// `sequence` values of the raw content items the segment was built from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_sequences: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum StageStatus {
    Completed,
    Skipped,
    Halted,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, TS)]
#[ts(export)]
pub struct StageRecord {
    pub stage: String,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub completed_at: String,
}

#[derive(Default, Clone, Debug, PartialEq, Deserialize, Serialize, TS)]
#[ts(export)]
pub struct DocumentData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    document_id: Option<String>,
    #[serde(default)]
    pub metadata: MetaData,
    #[serde(default, skip_serializing_if = "RawData::is_empty")]
    pub raw_data: RawData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    segments: Vec<SegmentData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    stage_history: Vec<StageRecord>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    closed: bool,
}

impl DocumentData {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: Some(document_id.into()),
            ..Self::default()
        }
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    pub fn filepath(&self) -> Option<&str> {
        self.metadata
            .standard_data
            .as_ref()
            .map(|standard| standard.filepath.value.as_str())
    }

    pub fn segments(&self) -> &[SegmentData] {
        &self.segments
    }

    pub fn stage_history(&self) -> &[StageRecord] {
        &self.stage_history
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Appends extracted lines after the existing ones, continuing the
    /// sequence numbering.
    pub fn append_content(&mut self, items: impl IntoIterator<Item = ContentData>) {
        let mut next = self
            .raw_data
            .other_data
            .iter()
            .map(|item| item.sequence)
            .max()
            .map_or(0, |max| max + 1);
        for mut item in items {
            item.sequence = next;
            next += 1;
            self.raw_data.other_data.push(item);
        }
    }

    /// Merges annotations; keys already present are overwritten, others kept.
    pub fn merge_extracted_metadata(&mut self, values: BTreeMap<String, ValueData>) {
        self.metadata.extracted.extend(values);
    }

    /// Segment boundaries belong to the segmentation stage, which replaces
    /// them as a whole.
    pub fn replace_segments(&mut self, segments: Vec<SegmentData>) {
        self.segments = segments;
    }

    pub fn record_stage(&mut self, stage: &str, status: StageStatus, message: Option<String>) {
        self.stage_history.push(StageRecord {
            stage: stage.to_string(),
            status,
            message,
            completed_at: Utc::now().to_rfc3339(),
        });
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Checks the structural invariants every stage relies on.
    pub fn validate(&self) -> DppResult<()> {
        if let Some(id) = self.document_id.as_deref() {
            if id.trim().is_empty() {
                return Err(DppError::validation("/document_id", "must not be blank"));
            }
        }

        for (pointer, bbox) in self.raw_data.bboxes() {
            if bbox.len() < 4 {
                return Err(DppError::validation(
                    format!("/raw_data{pointer}"),
                    format!("bounding box needs 4 coordinates, found {}", bbox.len()),
                ));
            }
            if bbox.iter().any(|coord| !coord.is_finite()) {
                return Err(DppError::validation(
                    format!("/raw_data{pointer}"),
                    "bounding box coordinates must be finite",
                ));
            }
        }

        Ok(())
    }

    pub fn to_json_pretty(&self) -> DppResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> DppResult<Self> {
        let document: Self = serde_json::from_str(raw)?;
        document.validate()?;
        Ok(document)
    }
}

fn format_system_time(time: std::time::SystemTime) -> String {
    let local: DateTime<Local> = time.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn human_readable_size(size_in_bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if size_in_bytes == 0 {
        return "0".to_string();
    }
    let mut unit = 0usize;
    let mut size = size_in_bytes as f64;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

fn guess_mime_type(ext: &str) -> Option<&'static str> {
    let mime = match ext.to_ascii_lowercase().as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => return None,
    };
    Some(mime)
}
