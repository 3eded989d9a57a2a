//! Database queries for users and their profile attributes.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::models::{CompanyId, ReputationTier, Role, Stage, User, UserId, UserProfile};
use super::source::EligibilityFilter;

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    role: String,
    is_active: bool,
    last_activity_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        let role = Role::parse(&row.role)
            .ok_or_else(|| anyhow!("user {} has unknown role {:?}", row.id, row.role))?;
        Ok(User {
            id: row.id,
            role,
            is_active: row.is_active,
            last_activity_at: row.last_activity_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: i64,
    role: String,
    is_active: bool,
    last_activity_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
    reputation_tier: Option<String>,
    portfolio_company_id: Option<i64>,
    bio: Option<String>,
    expertise: Option<String>,
    company_stage: Option<String>,
    company_description: Option<String>,
}

impl TryFrom<ProfileRow> for UserProfile {
    type Error = anyhow::Error;

    fn try_from(row: ProfileRow) -> Result<Self> {
        let user = User::try_from(UserRow {
            id: row.id,
            role: row.role,
            is_active: row.is_active,
            last_activity_at: row.last_activity_at,
            deleted_at: row.deleted_at,
        })?;

        // Only mentees inherit anything from a linked company
        let (company_id, company_stage, company_description) = if user.role == Role::Mentee {
            (
                row.portfolio_company_id,
                row.company_stage.as_deref().and_then(Stage::from_slug),
                row.company_description,
            )
        } else {
            (None, None, None)
        };

        Ok(UserProfile {
            user,
            reputation_tier: row.reputation_tier.as_deref().and_then(ReputationTier::parse),
            company_id,
            company_stage,
            company_description,
            bio: row.bio,
            expertise: row.expertise,
        })
    }
}

/// Fetch a single user by id, including soft-deleted ones.
pub async fn get_user(pool: &PgPool, id: UserId) -> Result<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, role, is_active, last_activity_at, deleted_at FROM users WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch user")?;

    row.map(User::try_from).transpose()
}

/// Ids of users admitted by the candidate-pool filter.
pub async fn list_eligible(pool: &PgPool, filter: &EligibilityFilter) -> Result<Vec<UserId>> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id
        FROM users
        WHERE role = $1
          AND id <> $2
          AND deleted_at IS NULL
          AND last_activity_at >= $3
          AND ($4 = FALSE OR is_active)
        ORDER BY id
        "#,
    )
    .bind(filter.role.as_str())
    .bind(filter.exclude_id)
    .bind(filter.dormancy_cutoff)
    .bind(filter.require_active)
    .fetch_all(pool)
    .await
    .context("failed to list eligible users")
}

/// Every mentor and mentee that is not soft-deleted, optionally capped.
pub async fn list_recalculation_targets(pool: &PgPool, limit: Option<i64>) -> Result<Vec<UserId>> {
    // LIMIT NULL is LIMIT ALL in Postgres
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id
        FROM users
        WHERE role IN ('mentor', 'mentee')
          AND deleted_at IS NULL
        ORDER BY id
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list recalculation targets")
}

/// Bulk-load user rows joined with their linked company, in one query.
pub async fn fetch_profiles(pool: &PgPool, ids: &[UserId]) -> Result<Vec<UserProfile>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query_as::<_, ProfileRow>(
        r#"
        SELECT
            u.id,
            u.role,
            u.is_active,
            u.last_activity_at,
            u.deleted_at,
            u.reputation_tier,
            u.portfolio_company_id,
            u.bio,
            u.expertise,
            pc.stage AS company_stage,
            pc.description AS company_description
        FROM users u
        LEFT JOIN portfolio_companies pc ON pc.id = u.portfolio_company_id
        WHERE u.id = ANY($1)
        ORDER BY u.id
        "#,
    )
    .bind(ids)
    .fetch_all(pool)
    .await
    .context("failed to fetch user profiles")?;

    rows.into_iter().map(UserProfile::try_from).collect()
}

/// Live mentees linked to the given portfolio company.
pub async fn list_linked_mentees(pool: &PgPool, company_id: CompanyId) -> Result<Vec<UserId>> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id
        FROM users
        WHERE portfolio_company_id = $1
          AND role = 'mentee'
          AND deleted_at IS NULL
        ORDER BY id
        "#,
    )
    .bind(company_id)
    .fetch_all(pool)
    .await
    .context("failed to list mentees linked to company")
}
