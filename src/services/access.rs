//! Module and lesson entitlement rules.
//!
//! Everything here is a pure function of already-loaded rows and the acting
//! identity. Evaluation order encodes precedence: privileged identities, then
//! individual grants, then payment, then coming-soon, then publication.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::identity::{Email, Identity};
use crate::models::lesson::Lesson;
use crate::models::module::{ContentStatus, Module};

/// Individual module grants for the acting student.
#[derive(Debug, Clone, Default)]
pub struct GrantSet {
    grants: HashSet<(Uuid, Email)>,
}

impl GrantSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, module_id: Uuid, email: &Email) -> bool {
        self.grants.contains(&(module_id, email.clone()))
    }
}

impl FromIterator<(Uuid, Email)> for GrantSet {
    fn from_iter<I: IntoIterator<Item = (Uuid, Email)>>(iter: I) -> Self {
        Self {
            grants: iter.into_iter().collect(),
        }
    }
}

/// The resolved state of one module for one identity.
///
/// At most one of `is_coming_soon`, `has_access` and `is_paid_blocked` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModuleAccess {
    pub is_coming_soon: bool,
    pub has_access: bool,
    pub is_paid_blocked: bool,
}

impl ModuleAccess {
    const FULL: ModuleAccess = ModuleAccess {
        is_coming_soon: false,
        has_access: true,
        is_paid_blocked: false,
    };
}

/// Whether the module must be paid for by this identity.
///
/// An unresolved cohort counts as inside a specific paid scope.
fn is_paid_for(module: &Module, identity: &Identity) -> bool {
    module.is_paid && module.paid_cohorts.covers(identity.cohort, true)
}

/// Whether the module shows as coming soon to this identity.
///
/// An unresolved cohort counts as outside a specific coming-soon scope.
fn is_coming_soon_for(module: &Module, identity: &Identity) -> bool {
    module.coming_soon && module.coming_soon_cohorts.covers(identity.cohort, false)
}

/// Resolves the access state of `module` for `identity`.
pub fn resolve_module_access(module: &Module, identity: &Identity, grants: &GrantSet) -> ModuleAccess {
    if identity.is_privileged() {
        return ModuleAccess::FULL;
    }

    if grants.contains(module.id, &identity.email) {
        return ModuleAccess::FULL;
    }

    if is_paid_for(module, identity) {
        return ModuleAccess {
            is_coming_soon: false,
            has_access: false,
            is_paid_blocked: true,
        };
    }

    if is_coming_soon_for(module, identity) {
        return ModuleAccess {
            is_coming_soon: true,
            has_access: false,
            is_paid_blocked: false,
        };
    }

    ModuleAccess {
        is_coming_soon: false,
        has_access: module.status == ContentStatus::Published,
        is_paid_blocked: false,
    }
}

/// Why a lesson cannot be opened or played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonLock {
    Unpublished,
    ModuleComingSoon,
    ModuleUnavailable,
    PaymentRequired,
    Scheduled,
}

/// Whether a lesson row can be opened, and whether its content can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LessonAvailability {
    /// The row is listed and clickable.
    pub accessible: bool,
    /// The playback source may be handed out.
    pub playable: bool,
    pub lock: Option<LessonLock>,
    pub available_at: Option<DateTime<Utc>>,
}

impl LessonAvailability {
    fn locked(lock: LessonLock) -> Self {
        Self {
            accessible: false,
            playable: false,
            lock: Some(lock),
            available_at: None,
        }
    }
}

/// Resolves lesson availability given the access state of its module
/// (`None` for lessons outside any module).
pub fn resolve_lesson_availability(
    lesson: &Lesson,
    module_access: Option<&ModuleAccess>,
    now: DateTime<Utc>,
) -> LessonAvailability {
    if lesson.status != ContentStatus::Published {
        return LessonAvailability::locked(LessonLock::Unpublished);
    }

    if let Some(access) = module_access {
        if access.is_paid_blocked {
            return LessonAvailability::locked(LessonLock::PaymentRequired);
        }
        if access.is_coming_soon {
            return LessonAvailability::locked(LessonLock::ModuleComingSoon);
        }
        if !access.has_access {
            return LessonAvailability::locked(LessonLock::ModuleUnavailable);
        }
    }

    match (lesson.is_scheduled, lesson.scheduled_at) {
        (true, Some(at)) if at > now => LessonAvailability {
            accessible: true,
            playable: false,
            lock: Some(LessonLock::Scheduled),
            available_at: Some(at),
        },
        _ => LessonAvailability {
            accessible: true,
            playable: true,
            lock: None,
            available_at: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::identity::{CohortMembership, IdentitySource};
    use crate::models::module::CohortScope;
    use chrono::Duration;

    fn module() -> Module {
        Module {
            id: Uuid::new_v4(),
            area_id: Uuid::nil(),
            title: "Module".into(),
            description: None,
            position: 0,
            status: ContentStatus::Published,
            coming_soon: false,
            coming_soon_cohorts: CohortScope::All,
            is_paid: false,
            paid_price_cents: Some(5_000),
            paid_currency: Some("AOA".into()),
            paid_cohorts: CohortScope::All,
            paid_product_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn student(cohort: CohortMembership) -> Identity {
        let mut identity = Identity::student(
            Uuid::nil(),
            Email::parse("student@example.com").unwrap(),
            IdentitySource::VerifiedLink,
        );
        identity.cohort = cohort;
        identity
    }

    fn scope(ids: &[Uuid]) -> CohortScope {
        CohortScope::Specific(ids.iter().copied().collect())
    }

    fn lesson(status: ContentStatus) -> Lesson {
        Lesson {
            id: Uuid::new_v4(),
            area_id: Uuid::nil(),
            module_id: None,
            title: "Lesson".into(),
            description: None,
            position: 0,
            status,
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

    const BLOCKED: ModuleAccess = ModuleAccess {
        is_coming_soon: false,
        has_access: false,
        is_paid_blocked: true,
    };

    const COMING_SOON: ModuleAccess = ModuleAccess {
        is_coming_soon: true,
        has_access: false,
        is_paid_blocked: false,
    };

    #[test]
    fn free_modules_are_never_paid_blocked() {
        let a = Uuid::new_v4();
        let memberships = [
            CohortMembership::Unassigned,
            CohortMembership::Assigned(a),
            CohortMembership::Unknown,
        ];
        for paid_cohorts in [CohortScope::All, CohortScope::Nobody, scope(&[a])] {
            let mut m = module();
            m.paid_cohorts = paid_cohorts;
            for cohort in memberships {
                let access = resolve_module_access(&m, &student(cohort), &GrantSet::new());
                assert!(!access.is_paid_blocked);
            }
        }
    }

    #[test]
    fn paid_for_all_cohorts_blocks_everyone_without_grant() {
        let mut m = module();
        m.is_paid = true;
        m.paid_cohorts = CohortScope::All;
        for cohort in [
            CohortMembership::Unassigned,
            CohortMembership::Assigned(Uuid::new_v4()),
        ] {
            assert_eq!(resolve_module_access(&m, &student(cohort), &GrantSet::new()), BLOCKED);
        }
    }

    #[test]
    fn paid_for_nobody_is_free() {
        let mut m = module();
        m.is_paid = true;
        m.paid_cohorts = CohortScope::Nobody;
        for cohort in [
            CohortMembership::Unassigned,
            CohortMembership::Assigned(Uuid::new_v4()),
            CohortMembership::Unknown,
        ] {
            let access = resolve_module_access(&m, &student(cohort), &GrantSet::new());
            assert!(!access.is_paid_blocked);
            assert!(access.has_access);
        }
    }

    #[test]
    fn paid_for_specific_cohort_only_blocks_that_cohort() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut m = module();
        m.is_paid = true;
        m.paid_cohorts = scope(&[a]);

        let grants = GrantSet::new();
        assert_eq!(resolve_module_access(&m, &student(CohortMembership::Assigned(a)), &grants), BLOCKED);
        assert!(!resolve_module_access(&m, &student(CohortMembership::Assigned(b)), &grants).is_paid_blocked);
        assert!(!resolve_module_access(&m, &student(CohortMembership::Unassigned), &grants).is_paid_blocked);
    }

    #[test]
    fn unexempt_cohort_can_still_be_coming_soon() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut m = module();
        m.is_paid = true;
        m.paid_cohorts = scope(&[a]);
        m.coming_soon = true;
        m.coming_soon_cohorts = scope(&[b]);

        let access = resolve_module_access(&m, &student(CohortMembership::Assigned(b)), &GrantSet::new());
        assert_eq!(access, COMING_SOON);
    }

    #[test]
    fn unknown_cohort_fails_closed_for_payment_and_open_for_visibility() {
        let a = Uuid::new_v4();
        let mut paid = module();
        paid.is_paid = true;
        paid.paid_cohorts = scope(&[a]);
        assert_eq!(
            resolve_module_access(&paid, &student(CohortMembership::Unknown), &GrantSet::new()),
            BLOCKED
        );

        let mut soon = module();
        soon.coming_soon = true;
        soon.coming_soon_cohorts = scope(&[a]);
        let access = resolve_module_access(&soon, &student(CohortMembership::Unknown), &GrantSet::new());
        assert!(access.has_access);
    }

    #[test]
    fn individual_grant_overrides_everything() {
        let a = Uuid::new_v4();
        let mut m = module();
        m.is_paid = true;
        m.paid_cohorts = CohortScope::All;
        m.coming_soon = true;
        m.coming_soon_cohorts = CohortScope::All;
        m.status = ContentStatus::Draft;

        let identity = student(CohortMembership::Assigned(a));
        let before = resolve_module_access(&m, &identity, &GrantSet::new());
        assert!(!before.has_access);

        let grants: GrantSet = [(m.id, Email::parse(" STUDENT@example.com").unwrap())]
            .into_iter()
            .collect();
        let after = resolve_module_access(&m, &identity, &grants);
        assert_eq!(after, ModuleAccess::FULL);
    }

    #[test]
    fn grant_for_another_module_does_not_apply() {
        let mut m = module();
        m.is_paid = true;
        let identity = student(CohortMembership::Unassigned);
        let grants: GrantSet = [(Uuid::new_v4(), identity.email.clone())].into_iter().collect();
        assert_eq!(resolve_module_access(&m, &identity, &grants), BLOCKED);
    }

    #[test]
    fn admin_and_owner_have_full_access() {
        let mut m = module();
        m.is_paid = true;
        m.coming_soon = true;
        m.status = ContentStatus::Archived;

        let mut admin = student(CohortMembership::Unassigned);
        admin.is_admin = true;
        let mut owner = student(CohortMembership::Unassigned);
        owner.is_owner = true;

        assert_eq!(resolve_module_access(&m, &admin, &GrantSet::new()), ModuleAccess::FULL);
        assert_eq!(resolve_module_access(&m, &owner, &GrantSet::new()), ModuleAccess::FULL);
    }

    #[test]
    fn payment_check_short_circuits_coming_soon() {
        let mut m = module();
        m.is_paid = true;
        m.paid_cohorts = CohortScope::All;
        m.coming_soon = true;
        m.coming_soon_cohorts = CohortScope::Nobody;

        let identity = student(CohortMembership::Assigned(Uuid::new_v4()));
        let access = resolve_module_access(&m, &identity, &GrantSet::new());
        assert!(access.is_paid_blocked);
        assert!(!access.is_coming_soon);
    }

    #[test]
    fn coming_soon_respects_tristate_scope() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let grants = GrantSet::new();

        let mut m = module();
        m.coming_soon = true;
        m.coming_soon_cohorts = CohortScope::All;
        assert_eq!(resolve_module_access(&m, &student(CohortMembership::Unassigned), &grants), COMING_SOON);

        m.coming_soon_cohorts = CohortScope::Nobody;
        assert!(resolve_module_access(&m, &student(CohortMembership::Assigned(a)), &grants).has_access);

        m.coming_soon_cohorts = scope(&[a]);
        assert_eq!(resolve_module_access(&m, &student(CohortMembership::Assigned(a)), &grants), COMING_SOON);
        assert!(resolve_module_access(&m, &student(CohortMembership::Assigned(b)), &grants).has_access);
    }

    #[test]
    fn draft_module_is_not_accessible() {
        let mut m = module();
        m.status = ContentStatus::Draft;
        let access = resolve_module_access(&m, &student(CohortMembership::Unassigned), &GrantSet::new());
        assert_eq!(
            access,
            ModuleAccess {
                is_coming_soon: false,
                has_access: false,
                is_paid_blocked: false
            }
        );
    }

    #[test]
    fn resolution_is_idempotent() {
        let mut m = module();
        m.is_paid = true;
        m.paid_cohorts = scope(&[Uuid::new_v4()]);
        m.coming_soon = true;
        let identity = student(CohortMembership::Unknown);
        let grants = GrantSet::new();
        assert_eq!(
            resolve_module_access(&m, &identity, &grants),
            resolve_module_access(&m, &identity, &grants)
        );
    }

    #[test]
    fn unpublished_lesson_is_locked() {
        let availability = resolve_lesson_availability(&lesson(ContentStatus::Draft), None, Utc::now());
        assert!(!availability.accessible);
        assert_eq!(availability.lock, Some(LessonLock::Unpublished));
    }

    #[test]
    fn lesson_in_paid_blocked_module_routes_to_payment() {
        let availability =
            resolve_lesson_availability(&lesson(ContentStatus::Published), Some(&BLOCKED), Utc::now());
        assert!(!availability.accessible);
        assert_eq!(availability.lock, Some(LessonLock::PaymentRequired));
    }

    #[test]
    fn scheduled_lesson_is_visible_but_not_playable_until_due() {
        let now = Utc::now();
        let mut l = lesson(ContentStatus::Published);
        l.is_scheduled = true;
        l.scheduled_at = Some(now + Duration::hours(2));

        let before = resolve_lesson_availability(&l, Some(&ModuleAccess::FULL), now);
        assert!(before.accessible);
        assert!(!before.playable);
        assert_eq!(before.available_at, l.scheduled_at);

        let after = resolve_lesson_availability(&l, Some(&ModuleAccess::FULL), now + Duration::hours(3));
        assert!(after.playable);
    }

    #[test]
    fn schedule_is_ignored_when_flag_is_off() {
        let now = Utc::now();
        let mut l = lesson(ContentStatus::Published);
        l.scheduled_at = Some(now + Duration::days(1));
        assert!(resolve_lesson_availability(&l, None, now).playable);
    }
}
