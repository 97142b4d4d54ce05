use chrono::{DateTime, Utc};
use postgres_types::Json;
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::module::ContentStatus;

/// An extra link shown under a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplementaryLink {
    pub title: String,
    pub url: String,
}

/// A downloadable file attached to a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub url: String,
    pub size_bytes: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

/// The one playable source of a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "url", rename_all = "snake_case")]
pub enum PlaybackSource {
    Hls(String),
    Video(String),
    Embed(String),
}

/// A lesson inside a member area.
#[derive(Debug, Clone, Serialize)]
pub struct Lesson {
    pub id: Uuid,
    pub area_id: Uuid,
    pub module_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub position: i32,
    pub status: ContentStatus,
    pub video_url: Option<String>,
    pub embed_url: Option<String>,
    pub hls_url: Option<String>,
    pub duration_seconds: i32,
    pub is_scheduled: bool,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub complementary_links: Vec<ComplementaryLink>,
    pub materials: Vec<Material>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lesson {
    /// The authoritative playable source. HLS wins over a direct video file,
    /// which wins over an embed; writes only ever store one of them.
    pub fn playback_source(&self) -> Option<PlaybackSource> {
        let non_empty = |v: &Option<String>| v.as_ref().filter(|s| !s.trim().is_empty()).cloned();
        non_empty(&self.hls_url)
            .map(PlaybackSource::Hls)
            .or_else(|| non_empty(&self.video_url).map(PlaybackSource::Video))
            .or_else(|| non_empty(&self.embed_url).map(PlaybackSource::Embed))
    }
}

impl TryFrom<&Row> for Lesson {
    type Error = AppError;

    fn try_from(row: &Row) -> Result<Self> {
        let get = |column: &str| AppError::MissingData(column.to_string());
        let Json(complementary_links): Json<Vec<ComplementaryLink>> = row
            .try_get("complementary_links")
            .map_err(|_| get("complementary_links"))?;
        let Json(materials): Json<Vec<Material>> =
            row.try_get("materials").map_err(|_| get("materials"))?;

        Ok(Self {
            id: row.try_get("id").map_err(|_| get("id"))?,
            area_id: row.try_get("area_id").map_err(|_| get("area_id"))?,
            module_id: row.try_get("module_id").map_err(|_| get("module_id"))?,
            title: row.try_get("title").map_err(|_| get("title"))?,
            description: row.try_get("description").map_err(|_| get("description"))?,
            position: row.try_get("position").map_err(|_| get("position"))?,
            status: row.try_get("status").map_err(|_| get("status"))?,
            video_url: row.try_get("video_url").map_err(|_| get("video_url"))?,
            embed_url: row.try_get("embed_url").map_err(|_| get("embed_url"))?,
            hls_url: row.try_get("hls_url").map_err(|_| get("hls_url"))?,
            duration_seconds: row.try_get("duration_seconds").map_err(|_| get("duration_seconds"))?,
            is_scheduled: row.try_get("is_scheduled").map_err(|_| get("is_scheduled"))?,
            scheduled_at: row.try_get("scheduled_at").map_err(|_| get("scheduled_at"))?,
            complementary_links,
            materials,
            created_at: row.try_get("created_at").map_err(|_| get("created_at"))?,
            updated_at: row.try_get("updated_at").map_err(|_| get("updated_at"))?,
        })
    }
}
