//! memtier Integration Tests
//!
//! End-to-end behavior through the public API:
//! - Tiered cache lookups, promotion, eviction and TTL
//! - Priority batch processing
//! - Monitoring, reports and health

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use memtier::{EngineConfig, OptimizationEngine, Payload, ValueClass};
use parking_lot::Mutex;
use tempfile::TempDir;

fn engine_config(dir: &TempDir) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.cache.l3.directory = dir.path().join("l3");
    config.monitor.sample_resources = false;
    config
}

// =============================================================================
// Tiered Cache Tests
// =============================================================================

mod cache_tests {
    use super::*;
    use memtier::cache::{CacheTier, CodecRegistry, EvictionPolicy, L2Cache, L2Config};

    #[tokio::test]
    async fn test_l1_fifo_with_l2_fallback() {
        let dir = TempDir::new().unwrap();
        let mut config = engine_config(&dir);
        config.cache.l1.capacity = 2;
        config.cache.l2.max_entries = 10;
        let engine = OptimizationEngine::start(config).unwrap();
        let cache = engine.cache();

        for key in ["a", "b", "c"] {
            engine.cache_put(key, format!("value-{}", key), None);
        }
        assert_eq!(cache.l1().keys(), vec!["b", "c"]);
        assert!(["a", "b", "c"].iter().all(|k| cache.l2().contains(k)));

        let result = cache.lookup("a").await.unwrap();
        assert_eq!(result.tier, CacheTier::L2);
        assert_eq!(result.value, Payload::from("value-a"));
        assert_eq!(cache.l1().keys(), vec!["c", "a"]);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_promotion_from_l3_serves_next_get_from_l1() {
        let dir = TempDir::new().unwrap();
        let engine = OptimizationEngine::start(engine_config(&dir)).unwrap();
        let cache = engine.cache();

        engine.cache_put("cold", "stored on disk", None);
        cache.wait_for_persistence().await;
        cache.l1().clear();
        cache.l2().clear();

        let first = cache.lookup("cold").await.unwrap();
        assert_eq!(first.tier, CacheTier::L3);
        let second = cache.lookup("cold").await.unwrap();
        assert_eq!(second.tier, CacheTier::L1);

        let metrics = engine.monitor().cache_metrics();
        assert_eq!(metrics.tier_hits(CacheTier::L3), 1);
        assert_eq!(metrics.tier_hits(CacheTier::L1), 1);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_persisted_values_survive_restart() {
        let dir = TempDir::new().unwrap();
        {
            let engine = OptimizationEngine::start(engine_config(&dir)).unwrap();
            engine.cache_put("facts", serde_json::json!({"user": "likes tea"}), None);
            engine.shutdown().await;
        }

        let engine = OptimizationEngine::start(engine_config(&dir)).unwrap();
        let result = engine.cache().lookup("facts").await.unwrap();
        assert_eq!(result.tier, CacheTier::L3);
        assert_eq!(
            result.value.as_structured(),
            Some(&serde_json::json!({"user": "likes tea"}))
        );
        engine.shutdown().await;
    }

    #[test]
    fn test_l2_lru_eviction() {
        let l2 = L2Cache::with_config(L2Config {
            max_entries: 3,
            eviction: EvictionPolicy::Lru,
            ..Default::default()
        });

        l2.put("a", Payload::from("1"), None);
        l2.put("b", Payload::from("2"), None);
        l2.put("c", Payload::from("3"), None);
        // touching "a" protects it
        assert!(l2.get("a").is_some());
        l2.put("d", Payload::from("4"), None);

        assert!(l2.contains("a"));
        assert!(!l2.contains("b"));
        assert!(l2.contains("c"));
        assert!(l2.contains("d"));
    }

    #[tokio::test]
    async fn test_zero_ttl_is_always_a_miss() {
        let dir = TempDir::new().unwrap();
        let engine = OptimizationEngine::start(engine_config(&dir)).unwrap();

        engine.cache_put("ephemeral", "gone", Some(Duration::ZERO));
        assert!(engine.cache_get("ephemeral").await.is_none());
        engine.cache().wait_for_persistence().await;
        assert!(engine.cache_get("ephemeral").await.is_none());

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let engine = OptimizationEngine::start(engine_config(&dir)).unwrap();

        engine.cache_put("k", "v1", None);
        engine.cache_put("k", "v2", None);
        assert_eq!(engine.cache_get("k").await, Some(Payload::from("v2")));

        engine.cache().wait_for_persistence().await;
        engine.cache().l1().clear();
        engine.cache().l2().clear();
        assert_eq!(engine.cache_get("k").await, Some(Payload::from("v2")));

        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_remove_is_not_undone_by_pending_persistence() {
        let dir = TempDir::new().unwrap();
        let engine = OptimizationEngine::start(engine_config(&dir)).unwrap();
        let cache = engine.cache();

        for i in 0..50 {
            let key = format!("doc-{}", i);
            engine.cache_put(&key, "body", None);
            cache.remove(&key);
        }
        cache.wait_for_persistence().await;

        assert_eq!(cache.sizes().l3_entries, 0);
        for i in 0..50 {
            assert!(engine.cache_get(&format!("doc-{}", i)).await.is_none());
        }

        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_put_during_l3_promotion_is_kept() {
        let dir = TempDir::new().unwrap();
        let engine = OptimizationEngine::start(engine_config(&dir)).unwrap();
        let cache = Arc::clone(engine.cache());

        for i in 0..300 {
            let key = format!("user-{}", i);
            cache.put(&key, Payload::from("v1"), None);
            cache.wait_for_persistence().await;
            cache.l1().remove(&key);
            cache.l2().remove(&key);

            let reader = {
                let cache = Arc::clone(&cache);
                let key = key.clone();
                tokio::spawn(async move { cache.get(&key).await })
            };
            cache.put(&key, Payload::from("v2"), None);
            reader.await.unwrap();

            assert_eq!(cache.get(&key).await, Some(Payload::from("v2")), "{}", key);
        }

        cache.wait_for_persistence().await;
        cache.l1().clear();
        cache.l2().clear();
        assert_eq!(cache.get("user-0").await, Some(Payload::from("v2")));

        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_clear_drops_writes_issued_before_it() {
        let dir = TempDir::new().unwrap();
        let engine = OptimizationEngine::start(engine_config(&dir)).unwrap();

        for i in 0..100 {
            engine.cache_put(&format!("k{}", i), "v", None);
        }
        engine.clear_all_caches();
        engine.cache().wait_for_persistence().await;

        let sizes = engine.cache_sizes();
        assert_eq!(sizes.l1_entries + sizes.l2_entries + sizes.l3_entries, 0);
        for i in 0..100 {
            assert!(engine.cache_get(&format!("k{}", i)).await.is_none());
        }

        // writes after the clear persist normally
        engine.cache_put("after", "v", None);
        engine.cache().wait_for_persistence().await;
        assert_eq!(engine.cache_sizes().l3_entries, 1);

        engine.shutdown().await;
    }

    #[test]
    fn test_every_codec_round_trips() {
        let samples = vec![
            Payload::from(bytes::Bytes::from_static(b"\x00\x01raw\xff")),
            Payload::from("compressed conversation summary ".repeat(20)),
            Payload::from(vec![0.25f32, -1.5, 3.0, f32::MIN_POSITIVE]),
            Payload::from(serde_json::json!({"facts": ["a", "b"], "score": 0.9})),
        ];

        let registry = CodecRegistry::new();
        let mut ids = Vec::new();
        for value in &samples {
            let (id, encoded) = registry.encode(value).unwrap();
            assert_eq!(&registry.decode(id, &encoded).unwrap(), value);
            ids.push(id);
        }

        for class in ValueClass::ALL {
            registry.optimize_for(class);
        }
        for (value, plain_id) in samples.iter().zip(ids) {
            let (id, encoded) = registry.encode(value).unwrap();
            assert_eq!(&registry.decode(id, &encoded).unwrap(), value);
            if value.class() != ValueClass::Raw {
                assert_ne!(id, plain_id);
            }
        }
    }
}

// =============================================================================
// Batch Processing Tests
// =============================================================================

mod batch_tests {
    use super::*;
    use memtier::batch::{BatchOutput, HandlerError};

    type Calls = Arc<Mutex<Vec<Vec<String>>>>;

    fn recording_engine(dir: &TempDir, batch_size: usize) -> (OptimizationEngine, Calls) {
        let mut config = engine_config(dir);
        config.batch.batch_size = batch_size;
        config.batch.max_wait = Duration::from_secs(1);
        let engine = OptimizationEngine::start(config).unwrap();

        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);
        engine
            .register_task_type("summarize", move |batch: Vec<(String, Payload)>| {
                let recorded = Arc::clone(&recorded);
                async move {
                    recorded
                        .lock()
                        .push(batch.iter().map(|(id, _)| id.clone()).collect());
                    let out: Vec<Payload> = batch.into_iter().map(|(_, p)| p).collect();
                    Ok::<_, HandlerError>(BatchOutput::Many(out))
                }
            })
            .unwrap();
        (engine, calls)
    }

    #[tokio::test]
    async fn test_highest_priority_processed_first() {
        let dir = TempDir::new().unwrap();
        let (engine, calls) = recording_engine(&dir, 3);

        engine.add_task("low", "1", "summarize", 1).unwrap();
        engine.add_task("high", "9", "summarize", 9).unwrap();
        engine.add_task("mid", "5", "summarize", 5).unwrap();

        let first = engine.get_result("summarize", Duration::from_secs(2)).await;
        assert_eq!(first, Some(Payload::from("9")));
        assert_eq!(calls.lock()[0], vec!["high", "mid", "low"]);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_partial_batch_flushes_after_max_wait() {
        let dir = TempDir::new().unwrap();
        let (engine, calls) = recording_engine(&dir, 3);

        engine.add_task("t1", "one", "summarize", 0).unwrap();
        engine.add_task("t2", "two", "summarize", 0).unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;

        {
            let calls = calls.lock();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].len(), 2);
        }
        assert_eq!(engine.get_batch_results("summarize", None).len(), 2);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_failing_handler_delivers_nothing() {
        let dir = TempDir::new().unwrap();
        let mut config = engine_config(&dir);
        config.batch.batch_size = 2;
        let engine = OptimizationEngine::start(config).unwrap();

        engine
            .register_task_type("broken", |_batch: Vec<(String, Payload)>| async move {
                Err::<BatchOutput, HandlerError>("model unavailable".into())
            })
            .unwrap();

        for i in 0..4 {
            assert!(engine.add_task(&format!("t{}", i), "x", "broken", 0).unwrap());
        }
        engine.shutdown().await;

        let stats = engine.processor().stats();
        assert_eq!(stats.total_tasks, 4);
        assert_eq!(stats.failed_tasks, 4);
        assert_eq!(stats.processed_tasks, 0);
        assert!(engine.get_batch_results("broken", None).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_task_type_is_rejected() {
        let dir = TempDir::new().unwrap();
        let engine = OptimizationEngine::start(engine_config(&dir)).unwrap();

        assert_matches!(
            engine.add_task("t", "x", "nope", 0),
            Err(memtier::Error::UnknownTaskType(t)) if t == "nope"
        );
        engine.shutdown().await;
    }
}

// =============================================================================
// Monitoring Tests
// =============================================================================

mod monitoring_tests {
    use super::*;
    use memtier::monitoring::{HealthStatus, Trend};

    #[tokio::test]
    async fn test_performance_report_shape() {
        let dir = TempDir::new().unwrap();
        let engine = OptimizationEngine::start(engine_config(&dir)).unwrap();

        engine.cache_put("k", "v", None);
        engine.cache_get("k").await;
        engine.cache_get("missing").await;

        let report = engine.get_performance_report();
        assert!((report.cache_hit_rate - 0.5).abs() < f64::EPSILON);

        let json = serde_json::to_value(&report).unwrap();
        for key in ["cache_hit_rate", "cache_stats", "batch_stats", "resource_usage", "trends"] {
            assert!(json.get(key).is_some(), "missing report key {}", key);
        }

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_rising_batch_latency_is_degrading() {
        let dir = TempDir::new().unwrap();
        let engine = OptimizationEngine::start(engine_config(&dir)).unwrap();

        for i in 0..20u64 {
            engine
                .monitor()
                .record_batch(1, Duration::from_millis(100 + i * 10));
        }
        let trends = engine.monitor().get_trends(100);
        assert_eq!(trends.trend, Trend::Degrading);
        assert_eq!(engine.health().status, HealthStatus::Degraded);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_metrics_export() {
        let dir = TempDir::new().unwrap();
        let engine = OptimizationEngine::start(engine_config(&dir)).unwrap();

        engine.cache_put("k", "v", None);
        engine.cache_get("k").await;

        let text = engine.export_metrics();
        assert!(text.contains("# TYPE memtier_cache_lookups_total counter"));
        assert!(text.contains("memtier_cache_tier_hits_total{tier=\"l1\"} 1"));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_health_follows_lifecycle() {
        let dir = TempDir::new().unwrap();
        let engine = OptimizationEngine::start(engine_config(&dir)).unwrap();
        assert_eq!(engine.health().status, HealthStatus::Healthy);

        engine.shutdown().await;
        assert_eq!(engine.health().status, HealthStatus::Unhealthy);
    }
}
