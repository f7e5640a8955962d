use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use callmeter::{ExecutionContext, Instrumented, OperationScope};

// ─── Domain types ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub created_at: String,
}

impl User {
    fn from_map(map: &HashMap<String, String>) -> Self {
        let field = |k: &str| map.get(k).cloned().unwrap_or_default();
        Self {
            id: field("id"),
            name: field("name"),
            email: field("email"),
            role: field("role"),
            created_at: field("created_at"),
        }
    }
}

/// What handlers and jobs depend on; the instrumented store is the only
/// implementation they see.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn fetch(&self, ctx: &ExecutionContext, id: &str) -> RedisResult<Option<User>>;

    async fn create(&self, ctx: &ExecutionContext, user: &User) -> RedisResult<()>;
}

// ─── Redis hashes ────────────────────────────────────────────────

/// Users stored as `user:<id>` hashes.
pub struct RedisUserStore {
    conn: ConnectionManager,
}

impl OperationScope for RedisUserStore {
    const NAME: &'static str = "UserStore";
    const OPERATIONS: &'static [&'static str] = &["fetch", "create"];
}

impl RedisUserStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn fetch(&self, id: &str) -> RedisResult<Option<User>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(format!("user:{id}")).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(User::from_map(&map)))
    }

    async fn create(&self, user: &User) -> RedisResult<()> {
        let mut conn = self.conn.clone();
        conn.hset_multiple(
            format!("user:{}", user.id),
            &[
                ("id", user.id.as_str()),
                ("name", user.name.as_str()),
                ("email", user.email.as_str()),
                ("role", user.role.as_str()),
                ("created_at", user.created_at.as_str()),
            ],
        )
        .await
    }
}

#[async_trait]
impl UserStore for Instrumented<RedisUserStore> {
    async fn fetch(&self, ctx: &ExecutionContext, id: &str) -> RedisResult<Option<User>> {
        self.call_async(ctx, "fetch", |store| store.fetch(id)).await
    }

    async fn create(&self, ctx: &ExecutionContext, user: &User) -> RedisResult<()> {
        self.call_async(ctx, "create", |store| store.create(user)).await
    }
}
