use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use postgres_types::Json;
use uuid::Uuid;
use crate::{
    error::Result,
    models::{
        lesson::{ComplementaryLink, Lesson, Material},
        module::ContentStatus,
    },
};

/// Column values written on create and update.
#[derive(Debug, Clone)]
pub struct LessonFields {
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
}

/// Creates a lesson in an area.
pub async fn create_lesson(pool: &Pool, area_id: &Uuid, fields: &LessonFields) -> Result<Lesson> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            INSERT INTO lessons (
                area_id, module_id, title, description, position, status,
                video_url, embed_url, hls_url, duration_seconds, is_scheduled,
                scheduled_at, complementary_links, materials
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
            &[
                area_id,
                &fields.module_id,
                &fields.title,
                &fields.description,
                &fields.position,
                &fields.status,
                &fields.video_url,
                &fields.embed_url,
                &fields.hls_url,
                &fields.duration_seconds,
                &fields.is_scheduled,
                &fields.scheduled_at,
                &Json(&fields.complementary_links),
                &Json(&fields.materials),
            ],
        )
        .await?;
    Lesson::try_from(&row)
}

/// Replaces the editable columns of a lesson.
pub async fn update_lesson(
    pool: &Pool,
    area_id: &Uuid,
    lesson_id: &Uuid,
    fields: &LessonFields,
) -> Result<Option<Lesson>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            UPDATE lessons
            SET module_id = $3, title = $4, description = $5, position = $6,
                status = $7, video_url = $8, embed_url = $9, hls_url = $10,
                duration_seconds = $11, is_scheduled = $12, scheduled_at = $13,
                complementary_links = $14, materials = $15, updated_at = NOW()
            WHERE id = $1 AND area_id = $2
            RETURNING *
            "#,
            &[
                lesson_id,
                area_id,
                &fields.module_id,
                &fields.title,
                &fields.description,
                &fields.position,
                &fields.status,
                &fields.video_url,
                &fields.embed_url,
                &fields.hls_url,
                &fields.duration_seconds,
                &fields.is_scheduled,
                &fields.scheduled_at,
                &Json(&fields.complementary_links),
                &Json(&fields.materials),
            ],
        )
        .await?;
    row.as_ref().map(Lesson::try_from).transpose()
}

/// Deletes a lesson. Returns whether a row was removed.
pub async fn delete_lesson(pool: &Pool, area_id: &Uuid, lesson_id: &Uuid) -> Result<bool> {
    let client = pool.get().await?;
    let deleted = client
        .execute(
            "DELETE FROM lessons WHERE id = $1 AND area_id = $2",
            &[lesson_id, area_id],
        )
        .await?;
    Ok(deleted > 0)
}

/// Finds a lesson of an area.
pub async fn find_lesson(pool: &Pool, area_id: &Uuid, lesson_id: &Uuid) -> Result<Option<Lesson>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT * FROM lessons WHERE id = $1 AND area_id = $2",
            &[lesson_id, area_id],
        )
        .await?;
    row.as_ref().map(Lesson::try_from).transpose()
}

/// Lists the lessons of an area in display order.
pub async fn list_lessons(pool: &Pool, area_id: &Uuid) -> Result<Vec<Lesson>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT * FROM lessons WHERE area_id = $1 ORDER BY position ASC, created_at ASC",
            &[area_id],
        )
        .await?;
    rows.iter().map(Lesson::try_from).collect()
}
