//! Bulk enrichment: turns a list of user ids into scoring inputs with a fixed
//! number of store round-trips.
//!
//! At most three queries are issued regardless of how many ids are passed:
//! profiles, personal tags, and (only when some mentee has a linked company)
//! company tags. The pieces are joined in memory through hash lookups.

use std::collections::HashMap;

use anyhow::Result;
use indexmap::IndexMap;

use crate::data::models::{
    CompanyId, OwnedTag, Role, Stage, Tag, TagCategory, TagOwner, UserId, UserProfile,
};
use crate::data::source::ProfileSource;

/// A user plus everything an engine needs to score it.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedCandidate {
    pub profile: UserProfile,
    /// Personal tags followed by inherited company tags, deduplicated by slug.
    pub tags: Vec<Tag>,
}

impl EnrichedCandidate {
    pub fn id(&self) -> UserId {
        self.profile.user.id
    }

    pub fn role(&self) -> Role {
        self.profile.user.role
    }

    /// Every lifecycle stage this user is associated with: the linked
    /// company's stage plus any stage-category tags.
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages: Vec<Stage> = self.profile.company_stage.into_iter().collect();
        for tag in &self.tags {
            if tag.category == TagCategory::Stage
                && let Some(stage) = Stage::from_slug(&tag.slug)
                && !stages.contains(&stage)
            {
                stages.push(stage);
            }
        }
        stages
    }
}

/// Merge personal and company tags, first occurrence of a slug wins.
pub fn merge_effective_tags<'a>(
    personal: impl IntoIterator<Item = &'a Tag>,
    company: impl IntoIterator<Item = &'a Tag>,
) -> Vec<Tag> {
    let mut merged: IndexMap<&str, &Tag> = IndexMap::new();
    for tag in personal.into_iter().chain(company) {
        merged.entry(tag.slug.as_str()).or_insert(tag);
    }
    merged.into_values().cloned().collect()
}

fn group_by_owner(rows: Vec<OwnedTag>) -> HashMap<i64, Vec<Tag>> {
    let mut grouped: HashMap<i64, Vec<Tag>> = HashMap::new();
    for row in rows {
        grouped.entry(row.owner_id).or_default().push(row.tag);
    }
    grouped
}

/// Enrich `ids` in input order. Ids with no profile row are dropped.
pub async fn enrich_many<S>(source: &S, ids: &[UserId]) -> Result<Vec<EnrichedCandidate>>
where
    S: ProfileSource + ?Sized,
{
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let profiles = source.fetch_profiles(ids).await?;
    let personal = group_by_owner(source.fetch_tags(TagOwner::User, ids).await?);

    let mut company_ids: Vec<CompanyId> = profiles
        .iter()
        .filter(|p| p.user.role == Role::Mentee)
        .filter_map(|p| p.company_id)
        .collect();
    company_ids.sort_unstable();
    company_ids.dedup();

    let company = if company_ids.is_empty() {
        HashMap::new()
    } else {
        group_by_owner(
            source
                .fetch_tags(TagOwner::PortfolioCompany, &company_ids)
                .await?,
        )
    };

    let mut by_id: HashMap<UserId, UserProfile> =
        profiles.into_iter().map(|p| (p.user.id, p)).collect();

    let empty: Vec<Tag> = Vec::new();
    let enriched = ids
        .iter()
        .filter_map(|id| by_id.remove(id))
        .map(|profile| {
            let own = personal.get(&profile.user.id).unwrap_or(&empty);
            let inherited = match (profile.user.role, profile.company_id) {
                (Role::Mentee, Some(company_id)) => company.get(&company_id).unwrap_or(&empty),
                _ => &empty,
            };
            EnrichedCandidate {
                tags: merge_effective_tags(own, inherited),
                profile,
            }
        })
        .collect();

    Ok(enriched)
}
