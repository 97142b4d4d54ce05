use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// A gated course portal owned by one seller.
#[derive(Debug, Clone, Serialize)]
pub struct MemberArea {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<&Row> for MemberArea {
    type Error = AppError;

    fn try_from(row: &Row) -> Result<Self> {
        let get = |column: &str| AppError::MissingData(column.to_string());
        Ok(Self {
            id: row.try_get("id").map_err(|_| get("id"))?,
            owner_id: row.try_get("owner_id").map_err(|_| get("owner_id"))?,
            name: row.try_get("name").map_err(|_| get("name"))?,
            slug: row.try_get("slug").map_err(|_| get("slug"))?,
            created_at: row.try_get("created_at").map_err(|_| get("created_at"))?,
        })
    }
}

/// A named group of students within an area.
#[derive(Debug, Clone, Serialize)]
pub struct Cohort {
    pub id: Uuid,
    pub area_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<&Row> for Cohort {
    type Error = AppError;

    fn try_from(row: &Row) -> Result<Self> {
        let get = |column: &str| AppError::MissingData(column.to_string());
        Ok(Self {
            id: row.try_get("id").map_err(|_| get("id"))?,
            area_id: row.try_get("area_id").map_err(|_| get("area_id"))?,
            name: row.try_get("name").map_err(|_| get("name"))?,
            created_at: row.try_get("created_at").map_err(|_| get("created_at"))?,
        })
    }
}

/// A roster entry. `password_hash` is only set for custom-login students.
#[derive(Debug, Clone, Serialize)]
pub struct Student {
    pub id: Uuid,
    pub area_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub cohort_id: Option<Uuid>,
    #[serde(skip)]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<&Row> for Student {
    type Error = AppError;

    fn try_from(row: &Row) -> Result<Self> {
        let get = |column: &str| AppError::MissingData(column.to_string());
        Ok(Self {
            id: row.try_get("id").map_err(|_| get("id"))?,
            area_id: row.try_get("area_id").map_err(|_| get("area_id"))?,
            email: row.try_get("email").map_err(|_| get("email"))?,
            name: row.try_get("name").map_err(|_| get("name"))?,
            cohort_id: row.try_get("cohort_id").map_err(|_| get("cohort_id"))?,
            password_hash: row.try_get("password_hash").map_err(|_| get("password_hash"))?,
            created_at: row.try_get("created_at").map_err(|_| get("created_at"))?,
        })
    }
}
