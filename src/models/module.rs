use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::identity::CohortMembership;

/// Publication status shared by modules and lessons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSql, FromSql)]
#[postgres(name = "content_status")]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    #[postgres(name = "draft")]
    Draft,
    #[postgres(name = "published")]
    Published,
    #[postgres(name = "archived")]
    Archived,
}

/// Which cohorts a module rule applies to.
///
/// Stored as a nullable `uuid[]`: `NULL` is [`CohortScope::All`], `'{}'` is
/// [`CohortScope::Nobody`], anything else is [`CohortScope::Specific`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CohortScope {
    All,
    Nobody,
    Specific(BTreeSet<Uuid>),
}

impl CohortScope {
    pub fn from_nullable(ids: Option<Vec<Uuid>>) -> Self {
        match ids {
            None => CohortScope::All,
            Some(ids) if ids.is_empty() => CohortScope::Nobody,
            Some(ids) => CohortScope::Specific(ids.into_iter().collect()),
        }
    }

    pub fn to_nullable(&self) -> Option<Vec<Uuid>> {
        match self {
            CohortScope::All => None,
            CohortScope::Nobody => Some(Vec::new()),
            CohortScope::Specific(ids) => Some(ids.iter().copied().collect()),
        }
    }

    /// Whether the rule covers a student with this membership.
    ///
    /// `unknown_in_scope` decides what an unresolved membership means for
    /// `Specific` scopes.
    pub fn covers(&self, membership: CohortMembership, unknown_in_scope: bool) -> bool {
        match self {
            CohortScope::All => true,
            CohortScope::Nobody => false,
            CohortScope::Specific(ids) => match membership {
                CohortMembership::Assigned(id) => ids.contains(&id),
                CohortMembership::Unassigned => false,
                CohortMembership::Unknown => unknown_in_scope,
            },
        }
    }
}

impl Default for CohortScope {
    fn default() -> Self {
        CohortScope::All
    }
}

impl Serialize for CohortScope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_nullable().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CohortScope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(CohortScope::from_nullable(Option::<Vec<Uuid>>::deserialize(deserializer)?))
    }
}

/// A course module inside a member area.
#[derive(Debug, Clone, Serialize)]
pub struct Module {
    pub id: Uuid,
    pub area_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub position: i32,
    pub status: ContentStatus,
    pub coming_soon: bool,
    pub coming_soon_cohorts: CohortScope,
    pub is_paid: bool,
    pub paid_price_cents: Option<i64>,
    pub paid_currency: Option<String>,
    pub paid_cohorts: CohortScope,
    pub paid_product_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<&Row> for Module {
    type Error = AppError;

    fn try_from(row: &Row) -> Result<Self> {
        let get = |column: &str| AppError::MissingData(column.to_string());
        Ok(Self {
            id: row.try_get("id").map_err(|_| get("id"))?,
            area_id: row.try_get("area_id").map_err(|_| get("area_id"))?,
            title: row.try_get("title").map_err(|_| get("title"))?,
            description: row.try_get("description").map_err(|_| get("description"))?,
            position: row.try_get("position").map_err(|_| get("position"))?,
            status: row.try_get("status").map_err(|_| get("status"))?,
            coming_soon: row.try_get("coming_soon").map_err(|_| get("coming_soon"))?,
            coming_soon_cohorts: CohortScope::from_nullable(
                row.try_get("coming_soon_cohort_ids")
                    .map_err(|_| get("coming_soon_cohort_ids"))?,
            ),
            is_paid: row.try_get("is_paid").map_err(|_| get("is_paid"))?,
            paid_price_cents: row.try_get("paid_price_cents").map_err(|_| get("paid_price_cents"))?,
            paid_currency: row.try_get("paid_currency").map_err(|_| get("paid_currency"))?,
            paid_cohorts: CohortScope::from_nullable(
                row.try_get("paid_cohort_ids").map_err(|_| get("paid_cohort_ids"))?,
            ),
            paid_product_id: row.try_get("paid_product_id").map_err(|_| get("paid_product_id"))?,
            created_at: row.try_get("created_at").map_err(|_| get("created_at"))?,
            updated_at: row.try_get("updated_at").map_err(|_| get("updated_at"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_empty_and_specific_stay_distinct() {
        let a = Uuid::new_v4();
        assert_eq!(CohortScope::from_nullable(None), CohortScope::All);
        assert_eq!(CohortScope::from_nullable(Some(vec![])), CohortScope::Nobody);
        assert_eq!(
            CohortScope::from_nullable(Some(vec![a])),
            CohortScope::Specific([a].into_iter().collect())
        );

        assert_eq!(CohortScope::All.to_nullable(), None);
        assert_eq!(CohortScope::Nobody.to_nullable(), Some(vec![]));
    }

    #[test]
    fn scope_deserializes_from_json_tristate() {
        let all: CohortScope = sonic_rs::from_str("null").unwrap();
        let nobody: CohortScope = sonic_rs::from_str("[]").unwrap();
        assert_eq!(all, CohortScope::All);
        assert_eq!(nobody, CohortScope::Nobody);
    }

    #[test]
    fn unknown_membership_follows_caller_choice() {
        let scope = CohortScope::Specific([Uuid::new_v4()].into_iter().collect());
        assert!(scope.covers(CohortMembership::Unknown, true));
        assert!(!scope.covers(CohortMembership::Unknown, false));
        assert!(!scope.covers(CohortMembership::Unassigned, true));
    }
}
