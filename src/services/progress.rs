//! Lesson watch progress.
//!
//! Player reports never touch the database on the request path: they are
//! pushed onto a bounded queue drained by a background worker, and every
//! failure along the way is logged and dropped.

use deadpool_postgres::Pool;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::lesson::Lesson;
use crate::models::module::ContentStatus;
use crate::models::progress::{ProgressRecord, ProgressUpdate};
use crate::repositories::progress as progress_repo;

/// Watched percentage of a lesson, clamped to 0..=100.
pub fn progress_percentage(current_time_seconds: f64, duration_seconds: f64) -> i32 {
    if !(duration_seconds > 0.0) || !current_time_seconds.is_finite() {
        return 0;
    }
    ((current_time_seconds / duration_seconds) * 100.0)
        .round()
        .clamp(0.0, 100.0) as i32
}

/// Whether a percentage counts as a completed lesson.
pub fn is_completed(percentage: i32, threshold: u8) -> bool {
    percentage >= i32::from(threshold)
}

/// `round(completed / total * 100)`, or 0 for an empty course.
pub fn course_progress(completed_lessons: usize, total_lessons: usize) -> u8 {
    if total_lessons == 0 {
        return 0;
    }
    let ratio = completed_lessons.min(total_lessons) as f64 / total_lessons as f64;
    (ratio * 100.0).round() as u8
}

/// Aggregated progress of a student.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProgressSummary {
    pub total_lessons: usize,
    pub completed_lessons: usize,
    pub percentage: u8,
    /// Completion percentage per module, keyed by module ID.
    pub modules: HashMap<Uuid, u8>,
}

/// Aggregates progress over the published lessons of an area.
pub fn summarize(lessons: &[Lesson], records: &[ProgressRecord]) -> ProgressSummary {
    let completed: std::collections::HashSet<Uuid> = records
        .iter()
        .filter(|r| r.completed)
        .map(|r| r.lesson_id)
        .collect();

    let published: Vec<&Lesson> = lessons
        .iter()
        .filter(|l| l.status == ContentStatus::Published)
        .collect();

    let mut per_module: HashMap<Uuid, (usize, usize)> = HashMap::new();
    for lesson in &published {
        if let Some(module_id) = lesson.module_id {
            let entry = per_module.entry(module_id).or_default();
            entry.1 += 1;
            if completed.contains(&lesson.id) {
                entry.0 += 1;
            }
        }
    }

    let completed_lessons = published.iter().filter(|l| completed.contains(&l.id)).count();

    ProgressSummary {
        total_lessons: published.len(),
        completed_lessons,
        percentage: course_progress(completed_lessons, published.len()),
        modules: per_module
            .into_iter()
            .map(|(id, (done, total))| (id, course_progress(done, total)))
            .collect(),
    }
}

/// Sending half of the progress queue.
#[derive(Clone)]
pub struct ProgressTelemetry {
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressTelemetry {
    /// Creates the queue. The receiver goes to [`spawn_worker`].
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queues a report without waiting. Returns whether it was accepted.
    pub fn submit(&self, update: ProgressUpdate) -> bool {
        match self.tx.try_send(update) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(update)) => {
                tracing::warn!(
                    "⚠️ Progress queue full, dropping report for lesson {}",
                    update.lesson_id
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(update)) => {
                tracing::error!(
                    "❌ Progress worker stopped, dropping report for lesson {}",
                    update.lesson_id
                );
                false
            }
        }
    }
}

/// Records a player time update for a student.
///
/// Never fails: the report is queued, or logged and dropped.
pub fn record_progress(
    telemetry: &ProgressTelemetry,
    area_id: Uuid,
    lesson_id: Uuid,
    student_email: &str,
    current_time_seconds: f64,
    duration_seconds: f64,
    completion_threshold: u8,
) -> bool {
    let percentage = progress_percentage(current_time_seconds, duration_seconds);
    telemetry.submit(ProgressUpdate {
        area_id,
        lesson_id,
        student_email: student_email.to_string(),
        current_time_seconds: current_time_seconds.max(0.0).min(i32::MAX as f64) as i32,
        progress_percentage: percentage,
        completed: is_completed(percentage, completion_threshold),
    })
}

/// Drains the progress queue into the database until every sender is gone.
pub fn spawn_worker(db: Pool, mut rx: mpsc::Receiver<ProgressUpdate>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            if let Err(e) = progress_repo::upsert(&db, &update).await {
                tracing::error!(
                    "❌ Failed to record progress for lesson {} ({}): {}",
                    update.lesson_id,
                    update.student_email,
                    e
                );
            }
        }
        tracing::info!("🛑 Progress worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn lesson(module_id: Option<Uuid>, status: ContentStatus) -> Lesson {
        Lesson {
            id: Uuid::new_v4(),
            area_id: Uuid::nil(),
            module_id,
            title: "Lesson".into(),
            description: None,
            position: 0,
            status,
            video_url: None,
            embed_url: None,
            hls_url: None,
            duration_seconds: 100,
            is_scheduled: false,
            scheduled_at: None,
            complementary_links: vec![],
            materials: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn done(lesson: &Lesson) -> ProgressRecord {
        ProgressRecord {
            lesson_id: lesson.id,
            student_email: "s@example.com".into(),
            video_current_time_seconds: 100,
            progress_percentage: 100,
            completed: true,
            last_watched_at: Utc::now(),
        }
    }

    #[test]
    fn course_progress_handles_empty_and_half() {
        assert_eq!(course_progress(0, 0), 0);
        assert_eq!(course_progress(2, 4), 50);
        assert_eq!(course_progress(1, 3), 33);
        assert_eq!(course_progress(3, 3), 100);
    }

    #[test]
    fn percentage_is_clamped_and_rounded() {
        assert_eq!(progress_percentage(30.0, 60.0), 50);
        assert_eq!(progress_percentage(90.0, 60.0), 100);
        assert_eq!(progress_percentage(-5.0, 60.0), 0);
        assert_eq!(progress_percentage(10.0, 0.0), 0);
        assert_eq!(progress_percentage(f64::NAN, 60.0), 0);
    }

    #[test]
    fn completion_tolerates_end_of_stream_jitter() {
        let pct = progress_percentage(587.0, 600.0);
        assert_eq!(pct, 98);
        assert!(is_completed(pct, 95));
        assert!(!is_completed(94, 95));
    }

    #[test]
    fn summary_counts_only_published_lessons() {
        let m = Uuid::new_v4();
        let a = lesson(Some(m), ContentStatus::Published);
        let b = lesson(Some(m), ContentStatus::Published);
        let c = lesson(None, ContentStatus::Published);
        let d = lesson(None, ContentStatus::Draft);
        let e = lesson(None, ContentStatus::Published);
        let records = vec![done(&a), done(&d), done(&c)];

        let summary = summarize(&[a, b, c, d, e], &records);
        assert_eq!(summary.total_lessons, 4);
        assert_eq!(summary.completed_lessons, 2);
        assert_eq!(summary.percentage, 50);
        assert_eq!(summary.modules.get(&m), Some(&50));
    }

    #[tokio::test]
    async fn reports_are_queued_without_blocking() {
        let (telemetry, mut rx) = ProgressTelemetry::new(1);
        let area = Uuid::new_v4();
        let lesson = Uuid::new_v4();

        assert!(record_progress(&telemetry, area, lesson, "s@example.com", 580.0, 600.0, 95));
        // Queue is full: the second report is dropped, not awaited.
        assert!(!record_progress(&telemetry, area, lesson, "s@example.com", 10.0, 600.0, 95));

        let update = rx.recv().await.unwrap();
        assert_eq!(update.progress_percentage, 97);
        assert!(update.completed);
        assert_eq!(update.current_time_seconds, 580);
    }

    #[tokio::test]
    async fn closed_queue_is_not_an_error() {
        let (telemetry, rx) = ProgressTelemetry::new(4);
        drop(rx);
        assert!(!record_progress(&telemetry, Uuid::nil(), Uuid::nil(), "s@example.com", 1.0, 2.0, 95));
    }
}
