use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

use crate::models::blob::BlobReference;

/// Uniform access to a durable object store addressed by (container, key).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `data` under `container/key`, overwriting any existing object.
    /// Returns only once the object is durable and readable.
    async fn put(
        &self,
        container: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<BlobReference, StorageError>;

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// List objects in `container` whose keys start with `prefix`.
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<BlobReference>, StorageError>;

    /// Publicly resolvable address of `container/key`.
    fn url_for(&self, container: &str, key: &str) -> String;

    /// Check storage connectivity (for health checks).
    async fn health_check(&self, container: &str) -> Result<(), StorageError>;
}

/// S3-compatible object storage, one bucket per container.
pub struct S3BlobStore {
    region: Region,
    credentials: Credentials,
    public_base_url: String,
}

impl S3BlobStore {
    pub fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        public_base_url: Option<&str>,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let public_base_url = public_base_url
            .unwrap_or(endpoint)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            region,
            credentials,
            public_base_url,
        })
    }

    fn bucket(&self, container: &str) -> Result<Box<Bucket>, StorageError> {
        let bucket = Bucket::new(container, self.region.clone(), self.credentials.clone())
            .map_err(|e| StorageError::Config(e.to_string()))?;
        Ok(bucket.with_path_style())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        container: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<BlobReference, StorageError> {
        let response = self
            .bucket(container)?
            .put_object_with_content_type(key, &data, content_type)
            .await?;
        check_status(response.status_code(), container, key)?;

        tracing::debug!(container, key, bytes = data.len(), "Stored object");
        Ok(BlobReference::new(container, key, self.url_for(container, key)))
    }

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket(container)?.get_object(key).await?;
        check_status(response.status_code(), container, key)?;
        Ok(response.to_vec())
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<BlobReference>, StorageError> {
        let pages = self.bucket(container)?.list(prefix.to_string(), None).await?;

        Ok(pages
            .into_iter()
            .flat_map(|page| page.contents)
            .map(|object| {
                let url = self.url_for(container, &object.key);
                BlobReference::new(container, object.key, url)
            })
            .collect())
    }

    fn url_for(&self, container: &str, key: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, container, key)
    }

    async fn health_check(&self, container: &str) -> Result<(), StorageError> {
        let (_, status) = self
            .bucket(container)?
            .list_page(String::new(), None, None, None, Some(1))
            .await?;
        check_status(status, container, "")
    }
}

fn check_status(status: u16, container: &str, key: &str) -> Result<(), StorageError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound {
            container: container.to_string(),
            key: key.to_string(),
        }),
        code => Err(StorageError::Status(code)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object not found: {container}/{key}")]
    NotFound { container: String, key: String },

    #[error("Storage returned HTTP {0}")]
    Status(u16),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(public: Option<&str>) -> S3BlobStore {
        S3BlobStore::new("http://localhost:9000", "auto", "key", "secret", public).unwrap()
    }

    #[test]
    fn url_uses_path_style_under_endpoint() {
        let store = store(None);
        assert_eq!(
            store.url_for("uploads", "abc.jpg"),
            "http://localhost:9000/uploads/abc.jpg"
        );
    }

    #[test]
    fn url_prefers_public_base_without_trailing_slash() {
        let store = store(Some("https://cdn.example.com/"));
        assert_eq!(
            store.url_for("resized", "x_320.jpg"),
            "https://cdn.example.com/resized/x_320.jpg"
        );
    }

    #[test]
    fn status_mapping() {
        assert!(check_status(200, "c", "k").is_ok());
        assert!(matches!(check_status(404, "c", "k"), Err(StorageError::NotFound { .. })));
        assert!(matches!(check_status(503, "c", "k"), Err(StorageError::Status(503))));
    }
}
