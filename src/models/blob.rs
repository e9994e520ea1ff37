use serde::{Deserialize, Serialize};

/// Address of an object in durable storage.
///
/// `container` and `key` identify the object; `url` is derived from them by
/// the store that wrote it and is only a resolvable convenience.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobReference {
    pub container: String,
    pub key: String,
    pub url: String,
}

impl BlobReference {
    pub fn new(container: impl Into<String>, key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
            url: url.into(),
        }
    }
}
