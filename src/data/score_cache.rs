//! Database operations for the `match_score_cache` table.
//!
//! Every write runs in a single transaction that first takes a transaction-scoped
//! advisory lock on `(source_user_id, algorithm_version)`. Readers therefore see
//! either the previous row set or the new one, and two writers for the same key
//! queue behind each other while writers for other keys proceed.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use super::models::{ScoreCacheEntry, UserId};
use crate::matching::explanation::MatchExplanation;

#[derive(sqlx::FromRow)]
struct CacheRow {
    source_user_id: i64,
    recommended_user_id: i64,
    algorithm_version: String,
    score: f64,
    explanation: Json<MatchExplanation>,
    calculated_at: DateTime<Utc>,
}

impl From<CacheRow> for ScoreCacheEntry {
    fn from(row: CacheRow) -> Self {
        ScoreCacheEntry {
            source_user_id: row.source_user_id,
            recommended_user_id: row.recommended_user_id,
            score: row.score,
            explanation: row.explanation.0,
            algorithm_version: row.algorithm_version,
            calculated_at: row.calculated_at,
        }
    }
}

async fn lock_key(
    tx: &mut Transaction<'_, Postgres>,
    user_id: UserId,
    algorithm_version: &str,
) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("{user_id}:{algorithm_version}"))
        .execute(&mut **tx)
        .await
        .context("failed to acquire cache key lock")?;
    Ok(())
}

/// Bulk insert rows for one key via UNNEST.
///
/// With `overwrite`, conflicting rows are updated in place (upsert); otherwise
/// the caller guarantees the key was cleared first.
async fn insert_rows(
    tx: &mut Transaction<'_, Postgres>,
    user_id: UserId,
    algorithm_version: &str,
    entries: &[ScoreCacheEntry],
    overwrite: bool,
) -> Result<()> {
    let recommended_ids: Vec<i64> = entries.iter().map(|e| e.recommended_user_id).collect();
    let scores: Vec<f64> = entries.iter().map(|e| e.score).collect();
    let explanations: Vec<serde_json::Value> = entries
        .iter()
        .map(|e| serde_json::to_value(&e.explanation))
        .collect::<Result<_, _>>()
        .context("failed to serialize match explanation")?;
    let calculated_at: Vec<DateTime<Utc>> = entries.iter().map(|e| e.calculated_at).collect();

    let conflict_clause = if overwrite {
        "ON CONFLICT (source_user_id, recommended_user_id, algorithm_version) DO UPDATE SET \
            score = EXCLUDED.score, \
            explanation = EXCLUDED.explanation, \
            calculated_at = EXCLUDED.calculated_at"
    } else {
        ""
    };

    sqlx::query(&format!(
        r#"
        INSERT INTO match_score_cache (
            source_user_id, recommended_user_id, algorithm_version,
            score, explanation, calculated_at
        )
        SELECT $1, v.recommended_user_id, $2, v.score, v.explanation, v.calculated_at
        FROM UNNEST($3::int8[], $4::float8[], $5::jsonb[], $6::timestamptz[])
            AS v(recommended_user_id, score, explanation, calculated_at)
        {conflict_clause}
        "#
    ))
    .bind(user_id)
    .bind(algorithm_version)
    .bind(&recommended_ids)
    .bind(&scores)
    .bind(&explanations)
    .bind(&calculated_at)
    .execute(&mut **tx)
    .await
    .context("failed to insert match scores")?;

    Ok(())
}

/// Replace every cached row for `(user_id, algorithm_version)` with `entries`.
///
/// An empty `entries` slice is a pure delete.
pub async fn replace(
    pool: &PgPool,
    user_id: UserId,
    algorithm_version: &str,
    entries: &[ScoreCacheEntry],
) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    lock_key(&mut tx, user_id, algorithm_version).await?;

    sqlx::query(
        "DELETE FROM match_score_cache WHERE source_user_id = $1 AND algorithm_version = $2",
    )
    .bind(user_id)
    .bind(algorithm_version)
    .execute(&mut *tx)
    .await
    .context("failed to delete previous match scores")?;

    if !entries.is_empty() {
        insert_rows(&mut tx, user_id, algorithm_version, entries, false).await?;
    }

    tx.commit().await.context("failed to commit cache replace")?;
    Ok(())
}

/// Insert or overwrite a subset of rows for the key.
pub async fn upsert(
    pool: &PgPool,
    user_id: UserId,
    algorithm_version: &str,
    entries: &[ScoreCacheEntry],
) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    lock_key(&mut tx, user_id, algorithm_version).await?;
    insert_rows(&mut tx, user_id, algorithm_version, entries, true).await?;
    tx.commit().await.context("failed to commit cache upsert")?;
    Ok(())
}

/// Remove rows for the key whose recommended user is not in `keep`.
pub async fn retain(
    pool: &PgPool,
    user_id: UserId,
    algorithm_version: &str,
    keep: &[UserId],
) -> Result<u64> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    lock_key(&mut tx, user_id, algorithm_version).await?;

    let removed = sqlx::query(
        r#"
        DELETE FROM match_score_cache
        WHERE source_user_id = $1
          AND algorithm_version = $2
          AND NOT (recommended_user_id = ANY($3))
        "#,
    )
    .bind(user_id)
    .bind(algorithm_version)
    .bind(keep)
    .execute(&mut *tx)
    .await
    .context("failed to prune stale match scores")?
    .rows_affected();

    tx.commit().await.context("failed to commit cache prune")?;
    Ok(removed)
}

/// Read path: highest-scoring cached recommendations for a user.
pub async fn top_matches(
    pool: &PgPool,
    user_id: UserId,
    algorithm_version: &str,
    limit: i64,
    min_score: Option<f64>,
) -> Result<Vec<ScoreCacheEntry>> {
    let rows = sqlx::query_as::<_, CacheRow>(
        r#"
        SELECT source_user_id, recommended_user_id, algorithm_version,
               score, explanation, calculated_at
        FROM match_score_cache
        WHERE source_user_id = $1
          AND algorithm_version = $2
          AND ($3::float8 IS NULL OR score >= $3)
        ORDER BY score DESC, recommended_user_id
        LIMIT $4
        "#,
    )
    .bind(user_id)
    .bind(algorithm_version)
    .bind(min_score)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to fetch cached matches")?;

    Ok(rows.into_iter().map(ScoreCacheEntry::from).collect())
}
