//! Bulk tag lookups for users and portfolio companies.

use anyhow::{Context, Result, anyhow};
use sqlx::PgPool;

use super::models::{OwnedTag, Tag, TagCategory, TagOwner};

/// Fetch every tag assigned to any of `owner_ids`, in a single query.
///
/// Rows come back grouped by owner and in assignment order, which is the
/// order effective-tag merging and explanation generation rely on.
pub async fn fetch_for_owners(
    pool: &PgPool,
    owner: TagOwner,
    owner_ids: &[i64],
) -> Result<Vec<OwnedTag>> {
    if owner_ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<(i64, String, String)> = sqlx::query_as(
        r#"
        SELECT et.entity_id, t.slug, t.category
        FROM entity_tags et
        JOIN tags t ON t.id = et.tag_id
        WHERE et.entity_type = $1
          AND et.entity_id = ANY($2)
        ORDER BY et.entity_id, et.assigned_at, t.id
        "#,
    )
    .bind(owner.as_str())
    .bind(owner_ids)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to fetch {} tags", owner.as_str()))?;

    rows.into_iter()
        .map(|(owner_id, slug, category)| {
            let category = TagCategory::parse(&category)
                .ok_or_else(|| anyhow!("tag {slug:?} has unknown category {category:?}"))?;
            Ok(OwnedTag {
                owner_id,
                tag: Tag { slug, category },
            })
        })
        .collect()
}
