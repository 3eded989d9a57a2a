mod helpers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use helpers::*;
use matchmaker::data::memory::{MemoryStore, WriteKind, WriteRecord};
use matchmaker::data::models::{Role, ScoreCacheEntry, UserId};
use matchmaker::matching::enrich::EnrichedCandidate;
use matchmaker::matching::explanation::MatchExplanation;
use matchmaker::matching::observer::RecalcObserver;
use matchmaker::matching::{
    CacheWriteMode, EngineTuning, MissingUserPolicy, RecalcDriver, RecalcError, RecalcOutcome,
    RecalcSummary, RecalculateAllOptions, RecalculateOptions, ScoredPair, ScoringEngine,
    SkipReason, remote, tag_engine,
};
use tokio_util::sync::CancellationToken;

fn stale_entry(source: UserId, recommended: UserId, version: &str) -> ScoreCacheEntry {
    ScoreCacheEntry {
        source_user_id: source,
        recommended_user_id: recommended,
        score: 99.0,
        explanation: MatchExplanation::fallback("stale"),
        algorithm_version: version.to_owned(),
        calculated_at: Utc::now() - chrono::Duration::days(30),
    }
}

fn recommended_ids(store: &MemoryStore, user_id: UserId, version: &str) -> Vec<UserId> {
    let mut ids: Vec<UserId> = store
        .cached(user_id, version)
        .iter()
        .map(|e| e.recommended_user_id)
        .collect();
    ids.sort_unstable();
    ids
}

fn chunked(size: usize) -> RecalculateOptions {
    RecalculateOptions {
        chunk_size: Some(size),
        ..RecalculateOptions::default()
    }
}

#[tokio::test]
async fn test_all_users_run_in_batches() {
    let store = populated_store(5, 5);
    let recorder = Arc::new(Recorder::default());
    let driver = tag_driver(&store).with_observer(recorder.clone());

    let options = RecalculateAllOptions {
        limit: Some(10),
        batch_size: Some(5),
        ..RecalculateAllOptions::default()
    };
    let summary = driver.recalculate_all(&options).await.expect("run succeeds");

    assert_eq!(
        summary,
        RecalcSummary {
            total: 10,
            succeeded: 10,
            failed: 0,
            skipped: 0,
            batches: 2,
            cancelled: false,
        }
    );
    assert_eq!(
        *recorder.batches.lock().unwrap(),
        vec![(1, 5, 0), (2, 5, 0)],
        "each batch should report its own counts"
    );
    assert_eq!(recorder.summaries.lock().unwrap().len(), 1);

    for mentor in 1..=5 {
        assert_eq!(
            recommended_ids(&store, mentor, tag_engine::ALGORITHM_VERSION),
            vec![101, 102, 103, 104, 105]
        );
    }
    for mentee in 101..=105 {
        assert_eq!(
            recommended_ids(&store, mentee, tag_engine::ALGORITHM_VERSION),
            vec![1, 2, 3, 4, 5]
        );
    }
}

#[tokio::test]
async fn test_limit_caps_targets() {
    let store = populated_store(5, 5);
    let driver = tag_driver(&store);

    let options = RecalculateAllOptions {
        limit: Some(3),
        batch_size: Some(2),
        ..RecalculateAllOptions::default()
    };
    let summary = driver.recalculate_all(&options).await.expect("run succeeds");
    assert_eq!(summary.total, 3);
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.succeeded, 3);
}

#[tokio::test]
async fn test_failures_are_isolated_per_user() {
    let store = populated_store(5, 5);
    store.fail_reads_for(3);
    store.fail_writes_for(102);
    let recorder = Arc::new(Recorder::default());
    let driver = tag_driver(&store).with_observer(recorder.clone());

    let options = RecalculateAllOptions {
        batch_size: Some(5),
        ..RecalculateAllOptions::default()
    };
    let summary = driver.recalculate_all(&options).await.expect("run succeeds");

    assert_eq!(summary.total, 10);
    assert_eq!(summary.succeeded, 8);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.skipped, 0);

    let mut failures = recorder.failures.lock().unwrap().clone();
    failures.sort_unstable();
    assert_eq!(failures, vec![3, 102]);

    assert!(store.cached(3, tag_engine::ALGORITHM_VERSION).is_empty());
    assert!(store.cached(102, tag_engine::ALGORITHM_VERSION).is_empty());
    assert_eq!(
        recommended_ids(&store, 4, tag_engine::ALGORITHM_VERSION),
        vec![101, 102, 103, 104, 105],
        "a sibling's failure must not affect other users in the batch"
    );
}

#[tokio::test]
async fn test_concurrent_calls_for_different_users() {
    let store = populated_store(2, 5);
    store.fail_writes_for(2);
    let driver = tag_driver(&store);
    let options = RecalculateOptions::default();

    let (first, second) = tokio::join!(
        driver.recalculate_one(1, &options),
        driver.recalculate_one(2, &options)
    );

    assert_eq!(
        first.expect("user 1 succeeds"),
        RecalcOutcome::Completed {
            candidates: 5,
            written: 5
        }
    );
    let err = second.expect_err("user 2's cache write fails");
    assert!(err.is_cache_write(), "unexpected error {err:?}");
    assert_eq!(err.user_id(), 2);
    assert_eq!(store.cached(1, tag_engine::ALGORITHM_VERSION).len(), 5);
}

#[tokio::test]
async fn test_replace_mode_writes_once_per_user() {
    let store = populated_store(1, 5);
    let recorder = Arc::new(Recorder::default());
    let driver = tag_driver(&store).with_observer(recorder.clone());

    let outcome = driver
        .recalculate_one(1, &chunked(2))
        .await
        .expect("recalculation succeeds");

    assert_eq!(
        outcome,
        RecalcOutcome::Completed {
            candidates: 5,
            written: 5
        }
    );
    assert_eq!(
        store.writes(),
        vec![WriteRecord {
            user_id: 1,
            algorithm_version: tag_engine::ALGORITHM_VERSION.to_owned(),
            kind: WriteKind::Replace,
            rows: 5,
        }]
    );
    assert_eq!(
        *recorder.chunks.lock().unwrap(),
        vec![(1, 2), (1, 2), (1, 1)]
    );
}

#[tokio::test]
async fn test_upsert_mode_writes_per_chunk_then_retains() {
    let store = populated_store(1, 5);
    let client = FixedReply::new(GOOD_VERDICT);
    let driver = llm_driver(&store, client.clone(), 2);

    let outcome = driver
        .recalculate_one(1, &RecalculateOptions::default())
        .await
        .expect("recalculation succeeds");

    assert_eq!(
        outcome,
        RecalcOutcome::Completed {
            candidates: 5,
            written: 5
        }
    );
    assert_eq!(client.calls(), 5);

    let kinds: Vec<(WriteKind, usize)> = store.writes().iter().map(|w| (w.kind, w.rows)).collect();
    assert_eq!(
        kinds,
        vec![
            (WriteKind::Upsert, 2),
            (WriteKind::Upsert, 2),
            (WriteKind::Upsert, 1),
            (WriteKind::Retain, 0),
        ]
    );

    let rows = store.cached(1, remote::ALGORITHM_VERSION);
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|r| r.score == 72.0));
}

#[tokio::test]
async fn test_stale_rows_are_removed_in_both_modes() {
    let store = populated_store(1, 3);
    store.seed_cache(1, tag_engine::ALGORITHM_VERSION, vec![stale_entry(1, 999, tag_engine::ALGORITHM_VERSION)]);
    store.seed_cache(1, remote::ALGORITHM_VERSION, vec![stale_entry(1, 999, remote::ALGORITHM_VERSION)]);

    tag_driver(&store)
        .recalculate_one(1, &RecalculateOptions::default())
        .await
        .expect("tag run succeeds");
    llm_driver(&store, FixedReply::new(GOOD_VERDICT), 5)
        .recalculate_one(1, &RecalculateOptions::default())
        .await
        .expect("llm run succeeds");

    assert_eq!(
        recommended_ids(&store, 1, tag_engine::ALGORITHM_VERSION),
        vec![101, 102, 103]
    );
    assert_eq!(
        recommended_ids(&store, 1, remote::ALGORITHM_VERSION),
        vec![101, 102, 103]
    );
    let retained = store
        .writes()
        .into_iter()
        .find(|w| w.kind == WriteKind::Retain)
        .expect("llm run retains");
    assert_eq!(retained.rows, 1, "the stale row should be removed");
}

#[tokio::test]
async fn test_versions_are_cached_independently() {
    let store = populated_store(1, 2);
    llm_driver(&store, FixedReply::new(GOOD_VERDICT), 5)
        .recalculate_one(1, &RecalculateOptions::default())
        .await
        .expect("llm run succeeds");
    tag_driver(&store)
        .recalculate_one(1, &RecalculateOptions::default())
        .await
        .expect("tag run succeeds");

    assert_eq!(store.cached(1, remote::ALGORITHM_VERSION).len(), 2);
    assert_eq!(store.cached(1, tag_engine::ALGORITHM_VERSION).len(), 2);
}

#[tokio::test]
async fn test_empty_pool_clears_cache() {
    let store = populated_store(1, 0);
    store.seed_cache(1, tag_engine::ALGORITHM_VERSION, vec![stale_entry(1, 50, tag_engine::ALGORITHM_VERSION)]);

    let outcome = tag_driver(&store)
        .recalculate_one(1, &RecalculateOptions::default())
        .await
        .expect("recalculation succeeds");

    assert_eq!(
        outcome,
        RecalcOutcome::Completed {
            candidates: 0,
            written: 0
        }
    );
    assert!(store.cached(1, tag_engine::ALGORITHM_VERSION).is_empty());
}

#[tokio::test]
async fn test_upstream_failure_keeps_existing_rows() {
    let store = populated_store(1, 3);
    store.seed_cache(1, tag_engine::ALGORITHM_VERSION, vec![stale_entry(1, 50, tag_engine::ALGORITHM_VERSION)]);
    store.fail_reads_for(1);
    let recorder = Arc::new(Recorder::default());

    let outcome = tag_driver(&store)
        .with_observer(recorder.clone())
        .recalculate_one(1, &RecalculateOptions::default())
        .await
        .expect("read failures are not returned as errors");

    assert_eq!(outcome, RecalcOutcome::Skipped(SkipReason::UpstreamUnavailable));
    assert!(store.writes().is_empty());
    assert_eq!(recommended_ids(&store, 1, tag_engine::ALGORITHM_VERSION), vec![50]);
    assert_eq!(*recorder.failures.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn test_missing_user_policies() {
    let store = populated_store(1, 1);

    let tag = tag_driver(&store).recalculate_one(9999, &RecalculateOptions::default()).await;
    assert!(
        matches!(tag, Err(RecalcError::UserNotFound(9999))),
        "tag engine reports a missing user as an error, got {tag:?}"
    );

    let llm = llm_driver(&store, FixedReply::new(GOOD_VERDICT), 5)
        .recalculate_one(9999, &RecalculateOptions::default())
        .await;
    assert_eq!(
        llm.expect("llm engine skips silently"),
        RecalcOutcome::Skipped(SkipReason::UserNotFound)
    );

    let triggered = tag_driver(&store)
        .recalculate_one(9999, &RecalculateOptions::for_trigger())
        .await;
    assert_eq!(
        triggered.expect("triggers never fail on a missing user"),
        RecalcOutcome::Skipped(SkipReason::UserNotFound)
    );

    let overridden = llm_driver(&store, FixedReply::new(GOOD_VERDICT), 5)
        .recalculate_one(
            9999,
            &RecalculateOptions {
                missing_user: Some(MissingUserPolicy::Fail),
                ..RecalculateOptions::default()
            },
        )
        .await;
    assert!(matches!(overridden, Err(RecalcError::UserNotFound(9999))));
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn test_soft_deleted_user_is_not_found() {
    let store = populated_store(0, 2);
    let mut gone = mentor(7);
    gone.user.deleted_at = Some(Utc::now());
    store.add_profile(gone);

    let result = tag_driver(&store)
        .recalculate_one(7, &RecalculateOptions::default())
        .await;
    assert!(matches!(result, Err(RecalcError::UserNotFound(7))));
}

#[tokio::test]
async fn test_soft_deleted_user_loses_its_cached_rows() {
    let store = populated_store(0, 2);
    let mut gone = mentor(7);
    gone.user.deleted_at = Some(Utc::now());
    store.add_profile(gone);
    store.seed_cache(
        7,
        tag_engine::ALGORITHM_VERSION,
        vec![stale_entry(7, 101, tag_engine::ALGORITHM_VERSION)],
    );

    let result = tag_driver(&store)
        .recalculate_one(7, &RecalculateOptions::default())
        .await;
    assert!(matches!(result, Err(RecalcError::UserNotFound(7))));
    assert!(store.cached(7, tag_engine::ALGORITHM_VERSION).is_empty());
    assert_eq!(
        store.writes(),
        vec![WriteRecord {
            user_id: 7,
            algorithm_version: tag_engine::ALGORITHM_VERSION.to_owned(),
            kind: WriteKind::Replace,
            rows: 0,
        }]
    );
}

#[tokio::test]
async fn test_coordinator_is_not_scorable() {
    let store = populated_store(1, 1);
    store.add_profile(profile(500, Role::Coordinator, 1));

    let outcome = tag_driver(&store)
        .recalculate_one(500, &RecalculateOptions::default())
        .await
        .expect("coordinators are skipped");
    assert_eq!(outcome, RecalcOutcome::Skipped(SkipReason::NotScorable));
    assert!(store.writes().is_empty());
    assert_eq!(store.query_counts().eligible, 0, "no candidate query for coordinators");
}

#[tokio::test]
async fn test_inactive_candidates_depend_on_engine() {
    let store = populated_store(1, 1);
    let mut inactive = mentee(150);
    inactive.user.is_active = false;
    store.add_profile(inactive);

    tag_driver(&store)
        .recalculate_one(1, &RecalculateOptions::default())
        .await
        .expect("tag run succeeds");
    llm_driver(&store, FixedReply::new(GOOD_VERDICT), 5)
        .recalculate_one(1, &RecalculateOptions::default())
        .await
        .expect("llm run succeeds");

    assert_eq!(recommended_ids(&store, 1, tag_engine::ALGORITHM_VERSION), vec![101]);
    assert_eq!(recommended_ids(&store, 1, remote::ALGORITHM_VERSION), vec![101, 150]);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let store = populated_store(3, 3);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let driver = tag_driver(&store).with_cancellation(cancel);

    let summary = driver
        .recalculate_all(&RecalculateAllOptions::default())
        .await
        .expect("run returns a summary");
    assert!(summary.cancelled);
    assert_eq!(summary.batches, 0);
    assert_eq!(summary.succeeded, 0);

    let outcome = driver
        .recalculate_one(1, &RecalculateOptions::default())
        .await
        .expect("cancelled runs are not errors");
    assert_eq!(outcome, RecalcOutcome::Cancelled);
    assert!(store.writes().is_empty());
}

/// Cancels the run once the first batch completes.
struct CancelAfterFirstBatch(CancellationToken);

impl RecalcObserver for CancelAfterFirstBatch {
    fn batch_finished(&self, _batch: usize, _batches: usize, _succeeded: usize, _failed: usize) {
        self.0.cancel();
    }
}

#[tokio::test]
async fn test_cancelled_between_batches() {
    let store = populated_store(5, 5);
    let cancel = CancellationToken::new();
    let driver = tag_driver(&store)
        .with_cancellation(cancel.clone())
        .with_observer(Arc::new(CancelAfterFirstBatch(cancel)));

    let options = RecalculateAllOptions {
        batch_size: Some(2),
        batch_delay: Some(Duration::from_secs(30)),
        ..RecalculateAllOptions::default()
    };
    let started = Instant::now();
    let summary = driver.recalculate_all(&options).await.expect("run returns a summary");

    assert!(summary.cancelled);
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.succeeded, 2);
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "cancellation should interrupt the batch delay"
    );
}

#[tokio::test]
async fn test_chunk_delay_only_between_chunks() {
    let store = populated_store(1, 3);
    let driver = tag_driver(&store);
    let delay = Duration::from_millis(200);

    let started = Instant::now();
    driver
        .recalculate_one(
            1,
            &RecalculateOptions {
                chunk_size: Some(1),
                chunk_delay: Some(delay),
                ..RecalculateOptions::default()
            },
        )
        .await
        .expect("recalculation succeeds");
    let elapsed = started.elapsed();

    assert!(elapsed >= delay * 2, "two pauses for three chunks, took {elapsed:?}");
    assert!(elapsed < delay * 3, "no pause after the last chunk, took {elapsed:?}");
}

/// Engine that panics when scoring for one source user.
struct PanicsFor(UserId);

#[async_trait]
impl ScoringEngine for PanicsFor {
    fn algorithm_version(&self) -> &str {
        "panics_v1"
    }

    fn tuning(&self) -> EngineTuning {
        EngineTuning {
            chunk_size: 10,
            chunk_delay: Duration::ZERO,
        }
    }

    fn write_mode(&self) -> CacheWriteMode {
        CacheWriteMode::ReplacePerUser
    }

    fn missing_user_policy(&self) -> MissingUserPolicy {
        MissingUserPolicy::Fail
    }

    fn requires_active_flag(&self) -> bool {
        true
    }

    async fn score(&self, source: &EnrichedCandidate, _candidate: &EnrichedCandidate) -> ScoredPair {
        assert_ne!(source.id(), self.0, "scoring blew up");
        ScoredPair {
            score: 1.0,
            explanation: MatchExplanation::default(),
        }
    }
}

#[tokio::test]
async fn test_panicking_user_counts_as_failed() {
    let store = populated_store(3, 2);
    let driver = RecalcDriver::new(store.clone(), Arc::new(PanicsFor(2)), &fast_config());

    let summary = driver
        .recalculate_all(&RecalculateAllOptions::default())
        .await
        .expect("run returns a summary");

    assert_eq!(summary.total, 5);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 4);
    assert!(store.cached(2, "panics_v1").is_empty());
    assert_eq!(store.cached(1, "panics_v1").len(), 2);
}
