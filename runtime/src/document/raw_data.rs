use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Box layout tag written by OCR providers (`[x1, y1, x2, y2]`).
pub const BBOX_FORMAT_CORNERS: &str = "x1y1x2y2";
/// Box layout tag after origin/size normalization (`[x, y, width, height]`).
pub const BBOX_FORMAT_ORIGIN_SIZE: &str = "xywh";

#[derive(Default, Clone, Debug, PartialEq, Deserialize, Serialize, TS)]
#[ts(export)]
pub struct ContentData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_bbox: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_pct: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handwritten: Option<bool>,
    #[serde(default = "unsequenced")]
    pub sequence: i64,
}

fn unsequenced() -> i64 {
    -1
}

#[derive(Default, Clone, Debug, PartialEq, Deserialize, Serialize, TS)]
#[ts(export)]
pub struct CellData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handwritten: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_pct: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_span: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_span: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_header: Option<bool>,
}

#[derive(Default, Clone, Debug, PartialEq, Deserialize, Serialize, TS)]
#[ts(export)]
pub struct TableData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_bbox: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cells: Vec<CellData>,
}

#[derive(Default, Clone, Debug, PartialEq, Deserialize, Serialize, TS)]
#[ts(export)]
pub struct KeyValueData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ContentData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ContentData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_confidence_pct: Option<u8>,
}

/// Everything the extraction stages pull out of the source file, grouped by
/// layout role. Each list keeps source order.
#[derive(Default, Clone, Debug, PartialEq, Deserialize, Serialize, TS)]
#[ts(export)]
pub struct RawData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub table_data: Vec<TableData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_value_data: Vec<KeyValueData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub heading_data: Vec<ContentData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub page_header_data: Vec<ContentData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub page_footer_data: Vec<ContentData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segment_data: Vec<ContentData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other_data: Vec<ContentData>,
}

impl RawData {
    pub fn is_empty(&self) -> bool {
        self.table_data.is_empty()
            && self.key_value_data.is_empty()
            && self.heading_data.is_empty()
            && self.page_header_data.is_empty()
            && self.page_footer_data.is_empty()
            && self.segment_data.is_empty()
            && self.other_data.is_empty()
    }

    /// Every bounding box in the raw data, paired with its JSON pointer
    /// relative to `raw_data`.
    pub(crate) fn bboxes(&self) -> Vec<(String, &[f64])> {
        let mut found = Vec::new();
        let content_lists: [(&str, &Vec<ContentData>); 5] = [
            ("heading_data", &self.heading_data),
            ("page_header_data", &self.page_header_data),
            ("page_footer_data", &self.page_footer_data),
            ("segment_data", &self.segment_data),
            ("other_data", &self.other_data),
        ];
        for (name, list) in content_lists {
            for (idx, item) in list.iter().enumerate() {
                if let Some(bbox) = item.content_bbox.as_deref() {
                    found.push((format!("/{name}/{idx}/content_bbox"), bbox));
                }
            }
        }

        for (t_idx, table) in self.table_data.iter().enumerate() {
            if let Some(bbox) = table.table_bbox.as_deref() {
                found.push((format!("/table_data/{t_idx}/table_bbox"), bbox));
            }
            for (c_idx, cell) in table.cells.iter().enumerate() {
                if let Some(bbox) = cell.bbox.as_deref() {
                    found.push((format!("/table_data/{t_idx}/cells/{c_idx}/bbox"), bbox));
                }
            }
        }

        for (idx, pair) in self.key_value_data.iter().enumerate() {
            for (side, content) in [("key", &pair.key), ("value", &pair.value)] {
                if let Some(bbox) = content.as_ref().and_then(|c| c.content_bbox.as_deref()) {
                    found.push((
                        format!("/key_value_data/{idx}/{side}/content_bbox"),
                        bbox,
                    ));
                }
            }
        }

        found
    }
}
