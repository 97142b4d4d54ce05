use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Watch progress of one student on one lesson.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressRecord {
    pub lesson_id: Uuid,
    pub student_email: String,
    pub video_current_time_seconds: i32,
    pub progress_percentage: i32,
    pub completed: bool,
    pub last_watched_at: DateTime<Utc>,
}

impl TryFrom<&Row> for ProgressRecord {
    type Error = AppError;

    fn try_from(row: &Row) -> Result<Self> {
        let get = |column: &str| AppError::MissingData(column.to_string());
        Ok(Self {
            lesson_id: row.try_get("lesson_id").map_err(|_| get("lesson_id"))?,
            student_email: row.try_get("student_email").map_err(|_| get("student_email"))?,
            video_current_time_seconds: row
                .try_get("video_current_time_seconds")
                .map_err(|_| get("video_current_time_seconds"))?,
            progress_percentage: row
                .try_get("progress_percentage")
                .map_err(|_| get("progress_percentage"))?,
            completed: row.try_get("completed").map_err(|_| get("completed"))?,
            last_watched_at: row.try_get("last_watched_at").map_err(|_| get("last_watched_at"))?,
        })
    }
}

/// A progress report submitted by the player, queued for the telemetry worker.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub area_id: Uuid,
    pub lesson_id: Uuid,
    pub student_email: String,
    pub current_time_seconds: i32,
    pub progress_percentage: i32,
    pub completed: bool,
}
