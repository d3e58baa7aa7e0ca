use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum MessageCode {
    Info,
    Warning,
    NoRecordsFound,
    UnhandledError,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, TS)]
#[ts(export)]
pub struct MessageItem {
    pub code: MessageCode,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_name: Option<String>,
}

impl MessageItem {
    pub fn new(code: MessageCode, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
            processor_name: None,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(MessageCode::Info, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(MessageCode::Warning, text)
    }

    pub fn is_tracked(&self) -> bool {
        matches!(
            self.code,
            MessageCode::UnhandledError | MessageCode::NoRecordsFound
        )
    }
}
