//! Redis integration tests.
//!
//! These tests require a running Redis instance.
//! Run with: `cargo test --test redis_integration -- --ignored`
//!
//! Set `REDIS_URL` environment variable to point to your Redis instance.
//! Default: <redis://localhost:6379>

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use fred::clients::Client;
use fred::interfaces::{ClientLike, KeysInterface, PubsubInterface};
use fred::types::config::Config as RedisConfig;
use serde_json::json;
use subcast_common::{BroadcastConfig, Metrics, QueueConfig};
use subcast_queue::{
    BROADCASTS_ENABLED, BroadcastIntake, BroadcastPlanner, EnqueueOptions, FeatureFlags,
    JobPersistence, JobQueue, JobStatus, RedisFlags, RedisJobMirror, StaticFlags,
    broadcast_channel,
};

fn get_redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

async fn connect() -> Arc<Client> {
    let config = RedisConfig::from_url(&get_redis_url()).expect("Invalid REDIS_URL");
    let client = Client::new(config, None, None, None);
    client.init().await.expect("Failed to connect to Redis");
    Arc::new(client)
}

fn unique_prefix(name: &str) -> String {
    format!("subcast-test-{name}-{}", std::process::id())
}

/// Test that a mirrored job can be read back.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_job_mirror_roundtrip() {
    let redis = connect().await;
    let prefix = unique_prefix("mirror");
    let mirror = RedisJobMirror::new(Arc::clone(&redis), prefix.clone())
        .with_ttl(Duration::from_secs(60));

    let queue = JobQueue::builder(&QueueConfig::default())
        .metrics(Arc::new(Metrics::new()))
        .build();
    let id = queue
        .enqueue("t", json!({"k": 1}), EnqueueOptions::default())
        .unwrap();
    let job = queue.job(id).unwrap();

    mirror.upsert(&job).await.expect("upsert failed");
    let stored = mirror.get(id).await.expect("get failed").expect("missing record");

    assert_eq!(stored.id, id);
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.payload, json!({"k": 1}));

    let _: () = redis.del(format!("{prefix}:job:{id}")).await.unwrap();
}

/// Test that flags follow the stored value.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_redis_flags() {
    let redis = connect().await;
    let prefix = unique_prefix("flags");
    let flags = RedisFlags::new(Arc::clone(&redis), prefix.clone());
    let key = format!("{prefix}:flag:{BROADCASTS_ENABLED}");

    assert!(!flags.get_flag(BROADCASTS_ENABLED, false).await);

    let _: () = redis.set(&key, "on", None, None, false).await.unwrap();
    assert!(flags.get_flag(BROADCASTS_ENABLED, false).await);

    let _: () = redis.set(&key, "0", None, None, false).await.unwrap();
    assert!(!flags.get_flag(BROADCASTS_ENABLED, true).await);

    let _: () = redis.del(&key).await.unwrap();
}

/// Test that a published request is planned onto the queue.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_intake_plans_published_request() {
    let redis = connect().await;
    let prefix = unique_prefix("intake");

    let queue = JobQueue::builder(&QueueConfig::default())
        .metrics(Arc::new(Metrics::new()))
        .build();
    let flags = StaticFlags::default().with(BROADCASTS_ENABLED, true);
    let planner = BroadcastPlanner::new(queue.clone(), Arc::new(flags));

    let intake = BroadcastIntake::connect(
        &get_redis_url(),
        &prefix,
        planner,
        BroadcastConfig::default(),
    )
    .await
    .expect("Failed to connect intake");
    let handle = intake.start().await.expect("Failed to subscribe");

    let request = json!({"segment": [1, 2, 3, 4, 5], "text": "hi", "chunkSize": 2});
    let _: () = redis
        .publish(broadcast_channel(&prefix), request.to_string())
        .await
        .unwrap();
    // Malformed requests are skipped without stopping the intake.
    let _: () = redis
        .publish(broadcast_channel(&prefix), "not json")
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.pending_jobs().len() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("request was not planned");
    assert!(!handle.is_finished());

    intake.shutdown().await;
}
