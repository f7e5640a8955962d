use redis::aio::ConnectionManager;
use redis::RedisResult;

use crate::context::ExecutionContext;
use crate::meter::Meter;

pub const NEW_CONNECTIONS: &str = "new_redis_connections";
pub const OPEN_CONNECTIONS: &str = "redis_connections";

/// Opens a `ConnectionManager` and counts it.
///
/// `new_redis_connections` goes to `ctx` (the current transaction, or the
/// untracked buffer), `redis_connections` is the process-wide gauge the
/// sampler reports. `ConnectionManager` clones share one multiplexed
/// connection, so the gauge counts managers, not clones.
pub async fn tracked_connect(
    url: &str,
    meter: &Meter,
    ctx: Option<&ExecutionContext>,
) -> RedisResult<ConnectionManager> {
    let client = redis::Client::open(url)?;
    let conn = ConnectionManager::new(client).await?;

    match ctx {
        Some(ctx) => ctx.increment(NEW_CONNECTIONS, 1.0),
        None => meter.context().increment(NEW_CONNECTIONS, 1.0),
    }
    meter.gauges().gauge(OPEN_CONNECTIONS).increment();
    tracing::info!(url, "redis connected");
    Ok(conn)
}

/// Counterpart to [`tracked_connect`] for a manager that is being dropped.
pub fn release(meter: &Meter) {
    meter.gauges().gauge(OPEN_CONNECTIONS).decrement();
}
