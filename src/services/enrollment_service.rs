//! Enrollment service - enrollment lifecycle and completion derivation
//!
//! The completion percentage is always derived from LessonProgress rows and
//! the course's lesson count; it is never incremented in place.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::models::{
    current_timestamp, fields, Enrollment, EnrollmentStatus, LessonProgress,
};
use crate::db::{self, RecordQuery, RecordStore};
use crate::error::EngineError;

use super::catalog_service::CatalogService;
use super::events::{EngineEvent, EventBus};

/// `round(100 * completed / total)` clamped to 0..=100; 0 when there are no lessons
pub fn completion_percentage(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    // Integer round-half-up of 100 * completed / total
    let rounded = (200 * completed + total) / (2 * total);
    rounded.min(100) as u8
}

/// Status implied by a percentage
pub fn status_for(percentage: u8) -> EnrollmentStatus {
    if percentage >= 100 {
        EnrollmentStatus::Completed
    } else {
        EnrollmentStatus::Active
    }
}

/// Enrollment tracker
pub struct EnrollmentService {
    store: Arc<dyn RecordStore>,
    events: Arc<EventBus>,
    catalog: Arc<CatalogService>,
}

impl EnrollmentService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        events: Arc<EventBus>,
        catalog: Arc<CatalogService>,
    ) -> Self {
        Self { store, events, catalog }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Canonical enrollment for (learner, course).
    ///
    /// Concurrent first access may have created duplicates; the earliest one
    /// wins.
    pub fn get_enrollment(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> Result<Option<Enrollment>, EngineError> {
        db::find_first(
            self.store.as_ref(),
            RecordQuery::new()
                .filter(fields::LEARNER_ID, learner_id)
                .filter(fields::COURSE_ID, course_id)
                .sort_asc(fields::ENROLLED_AT),
        )
    }

    /// One enrollment per course for a learner, oldest first
    pub fn list_for_learner(&self, learner_id: &str) -> Result<Vec<Enrollment>, EngineError> {
        let all: Vec<Enrollment> = db::find(
            self.store.as_ref(),
            &RecordQuery::new()
                .filter(fields::LEARNER_ID, learner_id)
                .sort_asc(fields::ENROLLED_AT),
        )?;

        let mut seen = HashSet::new();
        Ok(all
            .into_iter()
            .filter(|e| seen.insert(e.course_id.clone()))
            .collect())
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Return the existing enrollment or create an active one at 0%.
    ///
    /// Query-before-create; two racing first accesses may both create a row,
    /// which `get_enrollment` tolerates.
    pub fn ensure_enrollment(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> Result<Enrollment, EngineError> {
        if let Some(existing) = self.get_enrollment(learner_id, course_id)? {
            return Ok(existing);
        }

        self.catalog.get_course(course_id)?;

        let now = current_timestamp();
        let enrollment = Enrollment {
            id: Uuid::new_v4().to_string(),
            learner_id: learner_id.to_string(),
            course_id: course_id.to_string(),
            enrolled_at: now.clone(),
            completion_percentage: 0,
            status: EnrollmentStatus::Active,
            last_accessed_at: now,
        };
        let created = db::insert(self.store.as_ref(), &enrollment)?;

        info!(learner = %learner_id, course = %course_id, "Enrollment created");
        self.events.emit(EngineEvent::EnrollmentCreated {
            learner_id: learner_id.to_string(),
            course_id: course_id.to_string(),
        });

        Ok(created)
    }

    /// Re-derive percentage and status from completed lessons.
    ///
    /// Creates the enrollment if the learner has none yet. Fails with
    /// `NotFound` when the enrollment row disappears before the write.
    pub fn recompute_progress(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> Result<Enrollment, EngineError> {
        let enrollment = self.ensure_enrollment(learner_id, course_id)?;

        let lesson_ids = self.catalog.lesson_ids(course_id)?;
        let total = lesson_ids.len();
        let completed = if total == 0 {
            0
        } else {
            self.completed_lesson_count(learner_id, &lesson_ids)?
        };

        let percentage = completion_percentage(completed, total);
        let status = status_for(percentage);

        let updated: Enrollment = db::patch(
            self.store.as_ref(),
            &enrollment.id,
            json!({
                "completion_percentage": percentage,
                "status": status,
                "last_accessed_at": current_timestamp(),
            }),
        )?;

        debug!(
            learner = %learner_id,
            course = %course_id,
            completed,
            total,
            percentage,
            "Recomputed progress"
        );
        self.events.emit(EngineEvent::ProgressRecomputed {
            learner_id: learner_id.to_string(),
            course_id: course_id.to_string(),
            percentage,
            status,
        });
        if status == EnrollmentStatus::Completed && enrollment.status != EnrollmentStatus::Completed {
            info!(learner = %learner_id, course = %course_id, "Course completed");
            self.events.emit(EngineEvent::CourseCompleted {
                learner_id: learner_id.to_string(),
                course_id: course_id.to_string(),
            });
        }

        Ok(updated)
    }

    /// Distinct completed lessons among `lesson_ids`
    fn completed_lesson_count(
        &self,
        learner_id: &str,
        lesson_ids: &[String],
    ) -> Result<usize, EngineError> {
        let course_lessons: HashSet<&str> = lesson_ids.iter().map(String::as_str).collect();

        let completed: Vec<LessonProgress> = db::find(
            self.store.as_ref(),
            &RecordQuery::new()
                .filter(fields::LEARNER_ID, learner_id)
                .filter(fields::IS_COMPLETED, true),
        )?;

        let distinct: HashSet<&str> = completed
            .iter()
            .map(|p| p.lesson_id.as_str())
            .filter(|id| course_lessons.contains(id))
            .collect();

        Ok(distinct.len())
    }
}
