//! Process-local adapters with the same semantics as the S3 and Redis ones.
//!
//! Used by the test suite and for running the pipeline without external
//! infrastructure. Both support failure injection.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::blob::BlobReference;
use crate::services::queue::{Delivery, JobQueue, QueueError, QueueSettings};
use crate::services::storage::{BlobStore, StorageError};

const MEMORY_BASE_URL: &str = "memory://blobs";

/// In-memory blob store keyed by (container, key).
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    fail_reads: AtomicBool,
    /// Containers whose writes fail while set.
    failing_writes: Mutex<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `get` fail with [`StorageError::Unavailable`].
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every `put` into `container` fail until cleared.
    pub async fn fail_writes_to(&self, container: &str) {
        self.failing_writes.lock().await.push(container.to_string());
    }

    pub async fn clear_write_failures(&self) {
        self.failing_writes.lock().await.clear();
    }

    pub async fn object(&self, container: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .await
            .get(&(container.to_string(), key.to_string()))
            .cloned()
    }

    /// Number of objects in `container`.
    pub async fn count(&self, container: &str) -> usize {
        self.objects
            .lock()
            .await
            .keys()
            .filter(|(c, _)| c == container)
            .count()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        container: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<BlobReference, StorageError> {
        if self.failing_writes.lock().await.iter().any(|c| c == container) {
            return Err(StorageError::Unavailable(format!(
                "writes to {container} are failing"
            )));
        }

        self.objects.lock().await.insert(
            (container.to_string(), key.to_string()),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(BlobReference::new(container, key, self.url_for(container, key)))
    }

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("reads are failing".to_string()));
        }

        self.object(container, key)
            .await
            .map(|o| o.data)
            .ok_or_else(|| StorageError::NotFound {
                container: container.to_string(),
                key: key.to_string(),
            })
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<BlobReference>, StorageError> {
        Ok(self
            .objects
            .lock()
            .await
            .keys()
            .filter(|(c, k)| c == container && k.starts_with(prefix))
            .map(|(c, k)| BlobReference::new(c.as_str(), k.as_str(), self.url_for(c, k)))
            .collect())
    }

    fn url_for(&self, container: &str, key: &str) -> String {
        format!("{MEMORY_BASE_URL}/{container}/{key}")
    }

    async fn health_check(&self, _container: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    id: Uuid,
    body: String,
    visible_at: Instant,
}

#[derive(Debug)]
struct Lease {
    message: QueuedMessage,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<QueuedMessage>,
    leased: HashMap<String, Lease>,
    deliveries: HashMap<Uuid, u32>,
    dead_letters: Vec<String>,
}

/// In-memory at-least-once queue with leases and a dead-letter list.
pub struct MemoryJobQueue {
    settings: QueueSettings,
    state: Mutex<QueueState>,
    fail_enqueue: AtomicBool,
    fail_dead_letter: AtomicBool,
}

impl MemoryJobQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(QueueState::default()),
            fail_enqueue: AtomicBool::new(false),
            fail_dead_letter: AtomicBool::new(false),
        }
    }

    pub fn set_fail_enqueue(&self, fail: bool) {
        self.fail_enqueue.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_dead_letter(&self, fail: bool) {
        self.fail_dead_letter.store(fail, Ordering::SeqCst);
    }

    /// Bodies sent to the dead-letter queue, oldest first.
    pub async fn dead_letters(&self) -> Vec<String> {
        self.state.lock().await.dead_letters.clone()
    }

    /// Bodies waiting for delivery, oldest first.
    pub async fn pending_bodies(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .ready
            .iter()
            .map(|m| m.body.clone())
            .collect()
    }

    /// Messages currently held under a lease.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.leased.len()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, body: &str) -> Result<(), QueueError> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("enqueue is failing".to_string()));
        }

        self.state.lock().await.ready.push_back(QueuedMessage {
            id: Uuid::new_v4(),
            body: body.to_string(),
            visible_at: Instant::now(),
        });
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let expired: Vec<String> = state
            .leased
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some(lease) = state.leased.remove(&receipt) {
                tracing::info!(message_id = %lease.message.id, "Lease expired, message requeued");
                state.ready.push_back(lease.message);
            }
        }

        let Some(position) = state.ready.iter().position(|m| m.visible_at <= now) else {
            return Ok(None);
        };
        let Some(message) = state.ready.remove(position) else {
            return Ok(None);
        };

        let count = state.deliveries.entry(message.id).or_insert(0);
        *count += 1;
        let delivery_count = *count;

        let receipt = format!("{}:{}", message.id, delivery_count);
        let delivery = Delivery {
            id: message.id,
            body: message.body.clone(),
            delivery_count,
            receipt: receipt.clone(),
        };
        state.leased.insert(
            receipt,
            Lease {
                message,
                deadline: now + self.settings.visibility_timeout,
            },
        );

        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if state.leased.remove(&delivery.receipt).is_some() {
            state.deliveries.remove(&delivery.id);
        }
        Ok(())
    }

    async fn retry_later(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if let Some(mut lease) = state.leased.remove(&delivery.receipt) {
            lease.message.visible_at =
                Instant::now() + self.settings.retry_delay(delivery.delivery_count);
            state.ready.push_back(lease.message);
        }
        Ok(())
    }

    async fn dead_letter(&self, body: &str) -> Result<(), QueueError> {
        if self.fail_dead_letter.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable(format!(
                "{} is unreachable",
                self.settings.dead_letter_name
            )));
        }

        self.state.lock().await.dead_letters.push(body.to_string());
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let now = Instant::now();
        let state = self.state.lock().await;
        Ok(state.ready.iter().filter(|m| m.visible_at <= now).count() as u64)
    }

    async fn dead_letter_depth(&self) -> Result<u64, QueueError> {
        Ok(self.state.lock().await.dead_letters.len() as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
