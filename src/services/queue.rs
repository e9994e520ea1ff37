use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message handed out by the queue under a lease.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: Uuid,
    /// Raw message body exactly as enqueued.
    pub body: String,
    /// Number of times this message has been handed out, starting at 1.
    pub delivery_count: u32,
    /// Opaque handle identifying this lease to the queue.
    pub receipt: String,
}

/// Durable at-least-once queue with leases, delivery counts and a dead-letter queue.
///
/// A dequeued message stays invisible until it is acked, released with
/// [`JobQueue::retry_later`], or its lease expires, after which it is handed
/// out again with an incremented delivery count.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, body: &str) -> Result<(), QueueError>;

    async fn dequeue(&self) -> Result<Option<Delivery>, QueueError>;

    /// Remove the message permanently from the normal queue.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Make the message visible again after the queue's backoff delay.
    async fn retry_later(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Send `body` verbatim to the dead-letter queue.
    async fn dead_letter(&self, body: &str) -> Result<(), QueueError>;

    /// Messages waiting for delivery (excluding leased and delayed ones).
    async fn depth(&self) -> Result<u64, QueueError>;

    async fn dead_letter_depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Lease and redelivery timing shared by queue implementations.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub name: String,
    pub dead_letter_name: String,
    pub visibility_timeout: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl QueueSettings {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            dead_letter_name: format!("{name}-poison"),
            name,
            visibility_timeout: Duration::from_secs(300),
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
        }
    }

    /// Exponential backoff before a released message becomes visible again.
    pub fn retry_delay(&self, delivery_count: u32) -> Duration {
        let exponent = delivery_count.saturating_sub(1).min(16);
        self.retry_base_delay
            .saturating_mul(2u32.pow(exponent))
            .min(self.retry_max_delay)
    }
}

/// Envelope stored in Redis; the body is carried verbatim.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    id: Uuid,
    body: String,
}

/// Recover id and body from a stored payload.
///
/// Payloads pushed by other producers (a bare job message rather than an
/// envelope) are delivered as-is under an id derived from their content, so
/// the dead-letter policy still applies to them.
fn open_envelope(payload: String) -> (Uuid, String) {
    match serde_json::from_str::<Envelope>(&payload) {
        Ok(envelope) => (envelope.id, envelope.body),
        Err(_) => (Uuid::new_v5(&Uuid::NAMESPACE_OID, payload.as_bytes()), payload),
    }
}

// KEYS: ready, leases, payloads, delayed, deliveries
// ARGV: now_ms, lease_deadline_ms, lease_token
const DEQUEUE_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, token in ipairs(expired) do
    local payload = redis.call('HGET', KEYS[3], token)
    redis.call('ZREM', KEYS[2], token)
    redis.call('HDEL', KEYS[3], token)
    if payload then
        redis.call('LPUSH', KEYS[1], payload)
    end
end

local due = redis.call('ZRANGEBYSCORE', KEYS[4], '-inf', ARGV[1])
for _, token in ipairs(due) do
    local payload = redis.call('HGET', KEYS[3], token)
    redis.call('ZREM', KEYS[4], token)
    redis.call('HDEL', KEYS[3], token)
    if payload then
        redis.call('LPUSH', KEYS[1], payload)
    end
end

local payload = redis.call('RPOP', KEYS[1])
if not payload then
    return false
end

local count = redis.call('HINCRBY', KEYS[5], payload, 1)
redis.call('HSET', KEYS[3], ARGV[3], payload)
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
return {payload, count}
"#;

// KEYS: leases, payloads, deliveries
// ARGV: lease_token
const ACK_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
    return 0
end
local payload = redis.call('HGET', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
if payload then
    redis.call('HDEL', KEYS[3], payload)
end
return 1
"#;

// KEYS: leases, delayed
// ARGV: lease_token, visible_at_ms
const RETRY_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[1])
return 1
"#;

/// Redis-backed job queue.
///
/// Layout per queue `q`:
/// - `q` list of ready payloads (LPUSH in, RPOP out)
/// - `q:leases` zset lease token -> lease deadline (ms)
/// - `q:delayed` zset lease token -> visible-at (ms)
/// - `q:payloads` hash lease token -> payload, for leased and delayed messages
/// - `q:deliveries` hash payload -> delivery count
///
/// Every transition runs as one Lua script, so a worker dying mid-call never
/// strands a message outside the ready list and the lease sets. Lease tokens
/// are unique per delivery; settling an expired lease is a no-op.
///
/// The dead-letter queue is a plain list of raw bodies.
pub struct RedisJobQueue {
    client: redis::Client,
    settings: QueueSettings,
    dequeue_script: redis::Script,
    ack_script: redis::Script,
    retry_script: redis::Script,
}

impl RedisJobQueue {
    pub fn new(redis_url: &str, settings: QueueSettings) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            settings,
            dequeue_script: redis::Script::new(DEQUEUE_SCRIPT),
            ack_script: redis::Script::new(ACK_SCRIPT),
            retry_script: redis::Script::new(RETRY_SCRIPT),
        })
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.settings.name, suffix)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, body: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let envelope = Envelope {
            id: Uuid::new_v4(),
            body: body.to_string(),
        };
        let payload = serde_json::to_string(&envelope)?;
        conn.lpush::<_, _, ()>(&self.settings.name, &payload).await?;
        tracing::debug!(queue = %self.settings.name, message_id = %envelope.id, "Enqueued message");
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection().await?;
        let now = now_millis();
        let deadline = now + self.settings.visibility_timeout.as_millis() as u64;
        let token = Uuid::new_v4().to_string();

        let leased: Option<(String, u32)> = self
            .dequeue_script
            .key(&self.settings.name)
            .key(self.key("leases"))
            .key(self.key("payloads"))
            .key(self.key("delayed"))
            .key(self.key("deliveries"))
            .arg(now)
            .arg(deadline)
            .arg(&token)
            .invoke_async(&mut conn)
            .await?;

        let Some((payload, delivery_count)) = leased else {
            return Ok(None);
        };

        let (id, body) = open_envelope(payload);
        Ok(Some(Delivery {
            id,
            body,
            delivery_count,
            receipt: token,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let settled: u32 = self
            .ack_script
            .key(self.key("leases"))
            .key(self.key("payloads"))
            .key(self.key("deliveries"))
            .arg(&delivery.receipt)
            .invoke_async(&mut conn)
            .await?;

        if settled == 0 {
            tracing::warn!(message_id = %delivery.id, "Ack for expired lease ignored");
        }
        Ok(())
    }

    async fn retry_later(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let delay = self.settings.retry_delay(delivery.delivery_count);
        let visible_at = now_millis() + delay.as_millis() as u64;

        let settled: u32 = self
            .retry_script
            .key(self.key("leases"))
            .key(self.key("delayed"))
            .arg(&delivery.receipt)
            .arg(visible_at)
            .invoke_async(&mut conn)
            .await?;

        if settled == 0 {
            tracing::warn!(message_id = %delivery.id, "Release for expired lease ignored");
            return Ok(());
        }

        tracing::debug!(
            message_id = %delivery.id,
            delay_ms = delay.as_millis() as u64,
            "Message scheduled for redelivery"
        );
        Ok(())
    }

    async fn dead_letter(&self, body: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(&self.settings.dead_letter_name, body)
            .await?;
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(&self.settings.name).await?;
        Ok(depth)
    }

    async fn dead_letter_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(&self.settings.dead_letter_name).await?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}
