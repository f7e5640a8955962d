use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::Sink;
use crate::error::SinkError;
use crate::measurement::Batch;

/// Appends measurements as JSON strings to a capped Redis list.
///
/// One `MULTI` per batch: `RPUSH` keeps batch order, `LTRIM` keeps only the
/// newest `max_len` entries.
pub struct RedisSink {
    conn: ConnectionManager,
    key: String,
    max_len: usize,
}

impl RedisSink {
    pub async fn connect(url: &str, key: &str, max_len: usize) -> Result<Self, SinkError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            key: key.to_string(),
            max_len: max_len.max(1),
        })
    }
}

/// JSON payloads in batch order.
pub(crate) fn encode_batch(batch: &Batch) -> Result<Vec<String>, SinkError> {
    batch
        .measurements
        .iter()
        .map(|m| serde_json::to_string(m).map_err(SinkError::from))
        .collect()
}

#[async_trait]
impl Sink for RedisSink {
    fn name(&self) -> &str {
        "redis"
    }

    async fn write(&self, batch: &Batch) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }
        let payloads = encode_batch(batch)?;

        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .rpush(&self.key, payloads)
            .ignore()
            .ltrim(&self.key, -(self.max_len as isize), -1)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
