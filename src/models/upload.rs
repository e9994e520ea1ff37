use serde::{Deserialize, Serialize};

/// Acknowledgment returned by `POST /upload` once the resize job is enqueued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub original_url: String,
    pub status: String,
}

impl UploadResponse {
    pub fn enqueued(original_url: impl Into<String>) -> Self {
        Self {
            original_url: original_url.into(),
            status: "enqueued".to_string(),
        }
    }
}
