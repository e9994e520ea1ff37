use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::blob::BlobReference;

/// Resize job payload as it travels through the queue.
///
/// The wire format is plain UTF-8 JSON: `{"blobUrl": "...", "sizes": [320, 1024]}`.
/// `sizes` may be omitted, in which case the worker's default widths apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResizeJobMessage {
    pub blob_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sizes: Option<Vec<u32>>,
}

impl ResizeJobMessage {
    pub fn new(source: &BlobReference, sizes: Vec<u32>) -> Self {
        Self {
            blob_url: source.url.clone(),
            sizes: Some(sizes),
        }
    }

    /// Recover the object key from `blob_url`: everything after the last
    /// `/<container>/` path segment. Returns `None` if the segment is absent
    /// or nothing follows it.
    pub fn source_key(&self, container: &str) -> Option<&str> {
        let segment = format!("/{container}/");
        self.blob_url
            .rsplit_once(segment.as_str())
            .map(|(_, key)| key)
            .filter(|key| !key.is_empty())
    }

    /// Target widths for this job, falling back to `defaults` when the message
    /// carries none.
    pub fn target_widths<'a>(&'a self, defaults: &'a [u32]) -> &'a [u32] {
        self.sizes.as_deref().unwrap_or(defaults)
    }
}

/// One resized output image.
#[derive(Debug, Clone, PartialEq)]
pub struct Derivative {
    pub width: u32,
    pub height: u32,
    pub blob: BlobReference,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Success,
}

/// Immutable log object written once per successful job execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    pub original_url: String,
    pub output_urls: Vec<String>,
    pub processing_time_sec: f64,
    pub status: CompletionStatus,
    #[serde(with = "processed_at_format")]
    pub processed_at: DateTime<Utc>,
}

impl CompletionRecord {
    pub fn success(
        original_url: impl Into<String>,
        derivatives: &[Derivative],
        processing_time_sec: f64,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            original_url: original_url.into(),
            output_urls: derivatives.iter().map(|d| d.blob.url.clone()).collect(),
            processing_time_sec: (processing_time_sec * 1000.0).round() / 1000.0,
            status: CompletionStatus::Success,
            processed_at,
        }
    }
}

/// Second-precision UTC timestamps, e.g. `2024-05-01T12:30:00Z`.
mod processed_at_format {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_wire_message_without_sizes() {
        let msg: ResizeJobMessage =
            serde_json::from_str(r#"{"blobUrl":"http://s3.local/uploads/abc.png"}"#).unwrap();
        assert_eq!(msg.sizes, None);
        assert_eq!(msg.target_widths(&[320, 1024]), &[320, 1024]);
    }

    #[test]
    fn explicit_empty_sizes_are_not_replaced_by_defaults() {
        let msg: ResizeJobMessage =
            serde_json::from_str(r#"{"blobUrl":"http://s3.local/uploads/a.jpg","sizes":[]}"#).unwrap();
        assert!(msg.target_widths(&[320]).is_empty());
    }

    #[test]
    fn source_key_takes_text_after_last_container_segment() {
        let msg = ResizeJobMessage {
            blob_url: "https://cdn.example.com/uploads/nested/uploads/key.jpg".to_string(),
            sizes: None,
        };
        assert_eq!(msg.source_key("uploads"), Some("key.jpg"));
        assert_eq!(msg.source_key("resized"), None);
    }

    #[test]
    fn source_key_rejects_trailing_segment() {
        let msg = ResizeJobMessage {
            blob_url: "https://cdn.example.com/uploads/".to_string(),
            sizes: None,
        };
        assert_eq!(msg.source_key("uploads"), None);
    }

    #[test]
    fn completion_record_uses_camel_case_and_rounds_time() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let derivative = Derivative {
            width: 320,
            height: 160,
            blob: BlobReference::new("resized", "x_320.jpg", "http://s3.local/resized/x_320.jpg"),
        };
        let record = CompletionRecord::success("http://s3.local/uploads/x.jpg", &[derivative], 0.123456, at);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["originalUrl"], "http://s3.local/uploads/x.jpg");
        assert_eq!(json["outputUrls"][0], "http://s3.local/resized/x_320.jpg");
        assert_eq!(json["processingTimeSec"], 0.123);
        assert_eq!(json["status"], "success");
        assert_eq!(json["processedAt"], "2024-05-01T12:30:00Z");

        let back: CompletionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.processed_at, at);
    }
}
