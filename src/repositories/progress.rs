use deadpool_postgres::Pool;
use uuid::Uuid;
use crate::{
    error::Result,
    models::{
        identity::Email,
        progress::{ProgressRecord, ProgressUpdate},
    },
};

/// Upserts progress keyed by (lesson, student). The latest report wins for
/// position and percentage; completion never reverts once reached. Reports
/// for lessons outside the area are ignored.
pub async fn upsert(pool: &Pool, update: &ProgressUpdate) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO lesson_progress (
                lesson_id, student_email, area_id, video_current_time_seconds,
                progress_percentage, completed, last_watched_at
            )
            SELECT $1, $2, $3, $4, $5, $6, NOW()
            WHERE EXISTS (SELECT 1 FROM lessons WHERE id = $1 AND area_id = $3)
            ON CONFLICT (lesson_id, student_email) DO UPDATE
            SET video_current_time_seconds = EXCLUDED.video_current_time_seconds,
                progress_percentage = EXCLUDED.progress_percentage,
                completed = lesson_progress.completed OR EXCLUDED.completed,
                last_watched_at = NOW()
            "#,
            &[
                &update.lesson_id,
                &update.student_email,
                &update.area_id,
                &update.current_time_seconds,
                &update.progress_percentage,
                &update.completed,
            ],
        )
        .await?;
    Ok(())
}

/// All progress rows of a student inside an area.
pub async fn list_for_student(pool: &Pool, area_id: &Uuid, email: &Email) -> Result<Vec<ProgressRecord>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            r#"
            SELECT * FROM lesson_progress
            WHERE area_id = $1 AND student_email = $2
            "#,
            &[area_id, &email.as_str()],
        )
        .await?;
    rows.iter().map(ProgressRecord::try_from).collect()
}
