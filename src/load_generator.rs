use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use callmeter::JobRunner;

use crate::store::{User, UserStore};

/// Spawns `workers` tasks that run user-store jobs until `running` is
/// cleared, so an idle demo still produces job transactions.
pub fn spawn(
    workers: u32,
    runner: JobRunner,
    users: Arc<dyn UserStore>,
    running: Arc<AtomicBool>,
) -> Vec<JoinHandle<()>> {
    (0..workers)
        .map(|worker_id| {
            let runner = runner.clone();
            let users = users.clone();
            let running = running.clone();
            tokio::spawn(async move { worker(worker_id, runner, users, running).await })
        })
        .collect()
}

// ─── Worker loop ─────────────────────────────────────────────────

async fn worker(id: u32, runner: JobRunner, users: Arc<dyn UserStore>, running: Arc<AtomicBool>) {
    // Each worker gets its own deterministic RNG seeded uniquely.
    let mut rng = StdRng::seed_from_u64(1000 + id as u64);

    while running.load(Ordering::Relaxed) {
        let enqueued_at = Utc::now();
        let user_no = rng.gen_range(1..=500u32);

        let result = if rng.gen_bool(0.8) {
            runner
                .run_enqueued("lookup_user", Some(enqueued_at), |ctx| {
                    let users = users.clone();
                    async move {
                        users
                            .fetch(&ctx, &format!("demo_{user_no:04}"))
                            .await
                            .map(|_| ())
                    }
                })
                .await
        } else {
            let user = User {
                id: format!("demo_{user_no:04}"),
                name: format!("Demo User {user_no}"),
                email: format!("demo{user_no}@example.com"),
                role: "viewer".into(),
                created_at: Utc::now().to_rfc3339(),
            };
            runner
                .run_enqueued("create_user", Some(enqueued_at), |ctx| {
                    let users = users.clone();
                    async move { users.create(&ctx, &user).await }
                })
                .await
        };

        if let Err(e) = result {
            tracing::warn!(worker = id, error = %e, "demo job failed");
        }
        tokio::time::sleep(Duration::from_millis(rng.gen_range(50..250))).await;
    }
}
