//! What a student sees inside a member area.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::identity::Identity;
use crate::models::lesson::{ComplementaryLink, Lesson, Material, PlaybackSource};
use crate::models::module::{ContentStatus, Module};
use crate::models::progress::ProgressRecord;
use crate::repositories::{
    grant as grant_repo, lesson as lesson_repo, module as module_repo,
    progress as progress_repo,
};
use crate::services::access::{
    resolve_lesson_availability, resolve_module_access, GrantSet, LessonAvailability, LessonLock,
    ModuleAccess,
};
use crate::services::progress::{self as progress_service, ProgressSummary};
use crate::state::AppState;

/// Loads the individual grants of the acting student.
///
/// A failed lookup yields an empty set, so paid modules stay blocked.
pub async fn load_grants(state: &AppState, identity: &Identity) -> GrantSet {
    match grant_repo::modules_for_student(&state.db, &identity.area_id, &identity.email).await {
        Ok(modules) => modules
            .into_iter()
            .map(|module_id| (module_id, identity.email.clone()))
            .collect(),
        Err(e) => {
            tracing::warn!("⚠️ Grant lookup failed for {}: {}", identity.email, e);
            GrantSet::new()
        }
    }
}

async fn load_progress(state: &AppState, identity: &Identity) -> Vec<ProgressRecord> {
    progress_repo::list_for_student(&state.db, &identity.area_id, &identity.email)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("⚠️ Progress lookup failed for {}: {}", identity.email, e);
            Vec::new()
        })
}

/// Resolves one module for the acting student.
pub async fn module_access(state: &AppState, identity: &Identity, module: &Module) -> ModuleAccess {
    let grants = load_grants(state, identity).await;
    resolve_module_access(module, identity, &grants)
}

/// Watch progress on one lesson, as shown to the student.
#[derive(Debug, Clone, Serialize)]
pub struct LessonProgress {
    pub current_time_seconds: i32,
    pub percentage: i32,
    pub completed: bool,
    pub last_watched_at: DateTime<Utc>,
}

impl From<&ProgressRecord> for LessonProgress {
    fn from(record: &ProgressRecord) -> Self {
        Self {
            current_time_seconds: record.video_current_time_seconds,
            percentage: record.progress_percentage,
            completed: record.completed,
            last_watched_at: record.last_watched_at,
        }
    }
}

/// A lesson as handed to a student. Content fields stay empty until the
/// lesson is playable.
#[derive(Debug, Clone, Serialize)]
pub struct LessonView {
    pub id: Uuid,
    pub module_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub position: i32,
    pub duration_seconds: i32,
    pub is_scheduled: bool,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub availability: LessonAvailability,
    pub playback: Option<PlaybackSource>,
    pub complementary_links: Vec<ComplementaryLink>,
    pub materials: Vec<Material>,
    pub progress: Option<LessonProgress>,
}

impl LessonView {
    fn new(
        lesson: &Lesson,
        availability: LessonAvailability,
        progress: Option<&ProgressRecord>,
        with_content: bool,
    ) -> Self {
        let content = with_content && availability.playable;
        Self {
            id: lesson.id,
            module_id: lesson.module_id,
            title: lesson.title.clone(),
            description: lesson.description.clone(),
            position: lesson.position,
            duration_seconds: lesson.duration_seconds,
            is_scheduled: lesson.is_scheduled,
            scheduled_at: lesson.scheduled_at,
            availability,
            playback: if content { lesson.playback_source() } else { None },
            complementary_links: if content { lesson.complementary_links.clone() } else { Vec::new() },
            materials: if content { lesson.materials.clone() } else { Vec::new() },
            progress: progress.map(LessonProgress::from),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleView {
    #[serde(flatten)]
    pub module: Module,
    pub access: ModuleAccess,
    pub progress: u8,
    pub lessons: Vec<LessonView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AreaOverview {
    pub modules: Vec<ModuleView>,
    /// Published lessons that belong to no module.
    pub lessons: Vec<LessonView>,
    pub progress: ProgressSummary,
}

/// Whether a module is listed for this identity at all.
///
/// Owners and admins see every module; students see published ones, and
/// coming-soon placeholders.
fn is_listed(module: &Module, identity: &Identity, access: &ModuleAccess) -> bool {
    if module.status == ContentStatus::Archived && !identity.is_privileged() {
        return false;
    }
    identity.is_privileged() || module.status == ContentStatus::Published || access.is_coming_soon
}

/// Builds the member area overview from loaded rows. Performs no I/O.
pub fn build_overview(
    identity: &Identity,
    modules: Vec<Module>,
    lessons: &[Lesson],
    grants: &GrantSet,
    records: &[ProgressRecord],
    now: DateTime<Utc>,
) -> AreaOverview {
    let by_lesson: HashMap<Uuid, &ProgressRecord> =
        records.iter().map(|r| (r.lesson_id, r)).collect();
    let summary = progress_service::summarize(lessons, records);

    let mut views = Vec::with_capacity(modules.len());

    for module in modules {
        let access = resolve_module_access(&module, identity, grants);
        if !is_listed(&module, identity, &access) {
            continue;
        }

        let module_lessons = lessons
            .iter()
            .filter(|l| l.module_id == Some(module.id) && l.status == ContentStatus::Published)
            .map(|l| {
                let availability = resolve_lesson_availability(l, Some(&access), now);
                LessonView::new(l, availability, by_lesson.get(&l.id).copied(), false)
            })
            .collect();

        views.push(ModuleView {
            progress: summary.modules.get(&module.id).copied().unwrap_or(0),
            module,
            access,
            lessons: module_lessons,
        });
    }

    let loose = lessons
        .iter()
        .filter(|l| l.module_id.is_none() && l.status == ContentStatus::Published)
        .map(|l| {
            let availability = resolve_lesson_availability(l, None, now);
            LessonView::new(l, availability, by_lesson.get(&l.id).copied(), false)
        })
        .collect();

    AreaOverview {
        modules: views,
        lessons: loose,
        progress: summary,
    }
}

/// Loads modules, lessons, grants and progress concurrently and resolves
/// the overview.
pub async fn overview(state: &AppState, identity: &Identity) -> Result<AreaOverview> {
    tracing::debug!("📚 Loading overview of area {} for {}", identity.area_id, identity.email);

    let (modules, lessons, grants, records) = tokio::join!(
        module_repo::list_modules(&state.db, &identity.area_id),
        lesson_repo::list_lessons(&state.db, &identity.area_id),
        load_grants(state, identity),
        load_progress(state, identity),
    );

    Ok(build_overview(identity, modules?, &lessons?, &grants, &records, Utc::now()))
}

/// Maps a lock on a lesson that cannot be opened to the error returned to
/// the student.
fn lock_error(lock: Option<LessonLock>) -> AppError {
    match lock {
        Some(LessonLock::PaymentRequired) => {
            AppError::Payment("This lesson requires purchasing its module".to_string())
        }
        _ => AppError::NotFound,
    }
}

/// One lesson with its content, if the student may open it.
pub async fn lesson_detail(state: &AppState, identity: &Identity, lesson_id: Uuid) -> Result<LessonView> {
    let lesson = lesson_repo::find_lesson(&state.db, &identity.area_id, &lesson_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let access = match lesson.module_id {
        Some(module_id) => {
            let module = module_repo::find_module(&state.db, &identity.area_id, &module_id)
                .await?
                .ok_or(AppError::NotFound)?;
            if module.status != ContentStatus::Published && !identity.is_privileged() {
                return Err(AppError::NotFound);
            }
            Some(module_access(state, identity, &module).await)
        }
        None => None,
    };

    let availability = resolve_lesson_availability(&lesson, access.as_ref(), Utc::now());
    if !availability.accessible {
        return Err(lock_error(availability.lock));
    }

    let records = load_progress(state, identity).await;
    let progress = records.iter().find(|r| r.lesson_id == lesson.id);

    Ok(LessonView::new(&lesson, availability, progress, true))
}

/// Queues a progress report for a lesson.
pub fn report_progress(
    state: &AppState,
    identity: &Identity,
    lesson_id: Uuid,
    current_time_seconds: f64,
    duration_seconds: f64,
) -> bool {
    progress_service::record_progress(
        &state.telemetry,
        identity.area_id,
        lesson_id,
        identity.email.as_str(),
        current_time_seconds,
        duration_seconds,
        state.config.completion_threshold,
    )
}

/// Course and per-module progress of the acting student.
pub async fn course_progress(state: &AppState, identity: &Identity) -> Result<ProgressSummary> {
    let (lessons, records) = tokio::join!(
        lesson_repo::list_lessons(&state.db, &identity.area_id),
        load_progress(state, identity),
    );
    Ok(progress_service::summarize(&lessons?, &records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::identity::{CohortMembership, Email, IdentitySource};
    use crate::models::module::CohortScope;
    use chrono::Duration;

    fn student() -> Identity {
        let mut identity = Identity::student(
            Uuid::nil(),
            Email::parse("student@example.com").unwrap(),
            IdentitySource::CustomLogin,
        );
        identity.cohort = CohortMembership::Assigned(Uuid::from_u128(7));
        identity
    }

    fn module(status: ContentStatus) -> Module {
        Module {
            id: Uuid::new_v4(),
            area_id: Uuid::nil(),
            title: "Module".into(),
            description: None,
            position: 0,
            status,
            coming_soon: false,
            coming_soon_cohorts: CohortScope::All,
            is_paid: false,
            paid_price_cents: None,
            paid_currency: None,
            paid_cohorts: CohortScope::All,
            paid_product_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn lesson(module_id: Option<Uuid>) -> Lesson {
        Lesson {
            id: Uuid::new_v4(),
            area_id: Uuid::nil(),
            module_id,
            title: "Lesson".into(),
            description: None,
            position: 0,
            status: ContentStatus::Published,
            video_url: Some("https://cdn.example.com/v.mp4".into()),
            embed_url: None,
            hls_url: None,
            duration_seconds: 600,
            is_scheduled: false,
            scheduled_at: None,
            complementary_links: vec![],
            materials: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn drafts_are_hidden_from_students_but_not_owners() {
        let draft = module(ContentStatus::Draft);
        let published = module(ContentStatus::Published);
        let modules = vec![draft.clone(), published.clone()];

        let overview = build_overview(&student(), modules.clone(), &[], &GrantSet::new(), &[], Utc::now());
        assert_eq!(overview.modules.len(), 1);
        assert_eq!(overview.modules[0].module.id, published.id);

        let mut owner = student();
        owner.is_owner = true;
        let overview = build_overview(&owner, modules, &[], &GrantSet::new(), &[], Utc::now());
        assert_eq!(overview.modules.len(), 2);
    }

    #[test]
    fn paid_module_lists_locked_lessons_without_content() {
        let mut paid = module(ContentStatus::Published);
        paid.is_paid = true;
        paid.paid_price_cents = Some(1_000);
        let l = lesson(Some(paid.id));

        let overview = build_overview(&student(), vec![paid], &[l], &GrantSet::new(), &[], Utc::now());
        let view = &overview.modules[0];
        assert!(view.access.is_paid_blocked);
        assert_eq!(view.lessons[0].availability.lock, Some(LessonLock::PaymentRequired));
        assert!(view.lessons[0].playback.is_none());
    }

    #[test]
    fn detail_view_withholds_scheduled_content() {
        let mut l = lesson(None);
        l.is_scheduled = true;
        l.scheduled_at = Some(Utc::now() + Duration::days(1));

        let availability = resolve_lesson_availability(&l, None, Utc::now());
        let view = LessonView::new(&l, availability, None, true);
        assert!(view.availability.accessible);
        assert!(view.playback.is_none());

        let open = lesson(None);
        let availability = resolve_lesson_availability(&open, None, Utc::now());
        let view = LessonView::new(&open, availability, None, true);
        assert!(matches!(view.playback, Some(PlaybackSource::Video(_))));
    }

    #[test]
    fn loose_lessons_and_module_progress_are_reported() {
        let m = module(ContentStatus::Published);
        let in_module = lesson(Some(m.id));
        let loose = lesson(None);
        let record = ProgressRecord {
            lesson_id: in_module.id,
            student_email: "student@example.com".into(),
            video_current_time_seconds: 600,
            progress_percentage: 100,
            completed: true,
            last_watched_at: Utc::now(),
        };

        let overview = build_overview(
            &student(),
            vec![m],
            &[in_module, loose.clone()],
            &GrantSet::new(),
            &[record],
            Utc::now(),
        );
        assert_eq!(overview.lessons.len(), 1);
        assert_eq!(overview.lessons[0].id, loose.id);
        assert_eq!(overview.modules[0].progress, 100);
        assert_eq!(overview.progress.percentage, 50);
        assert!(overview.modules[0].lessons[0].progress.as_ref().unwrap().completed);
    }

    #[test]
    fn payment_lock_maps_to_payment_error() {
        assert!(matches!(lock_error(Some(LessonLock::PaymentRequired)), AppError::Payment(_)));
        assert!(matches!(lock_error(Some(LessonLock::ModuleComingSoon)), AppError::NotFound));
    }
}
