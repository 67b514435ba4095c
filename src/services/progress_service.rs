//! Lesson progress recorder
//!
//! Completion is monotonic: there is deliberately no way to mark a lesson
//! incomplete again.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::db::models::{current_timestamp, fields, LessonProgress};
use crate::db::{self, RecordQuery, RecordStore};
use crate::error::EngineError;

use super::catalog_service::CatalogService;
use super::enrollment_service::EnrollmentService;
use super::events::{EngineEvent, EventBus};

/// Lesson progress service
pub struct ProgressService {
    store: Arc<dyn RecordStore>,
    events: Arc<EventBus>,
    catalog: Arc<CatalogService>,
    enrollments: Arc<EnrollmentService>,
}

impl ProgressService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        events: Arc<EventBus>,
        catalog: Arc<CatalogService>,
        enrollments: Arc<EnrollmentService>,
    ) -> Self {
        Self {
            store,
            events,
            catalog,
            enrollments,
        }
    }

    /// Progress row for (learner, lesson). The oldest row wins if a race
    /// produced two.
    pub fn get_progress(
        &self,
        learner_id: &str,
        lesson_id: &str,
    ) -> Result<Option<LessonProgress>, EngineError> {
        db::find_first(
            self.store.as_ref(),
            RecordQuery::new()
                .filter(fields::LEARNER_ID, learner_id)
                .filter(fields::LESSON_ID, lesson_id)
                .sort_asc(fields::CREATED_AT),
        )
    }

    pub fn is_completed(&self, learner_id: &str, lesson_id: &str) -> Result<bool, EngineError> {
        Ok(self
            .get_progress(learner_id, lesson_id)?
            .map(|p| p.is_completed)
            .unwrap_or(false))
    }

    /// Progress rows for the lessons of a course, in course order
    pub fn progress_for_course(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> Result<Vec<LessonProgress>, EngineError> {
        let mut rows = Vec::new();
        for lesson_id in self.catalog.lesson_ids(course_id)? {
            if let Some(progress) = self.get_progress(learner_id, &lesson_id)? {
                rows.push(progress);
            }
        }
        Ok(rows)
    }

    /// Mark a lesson complete and recompute the owning course's enrollment.
    ///
    /// Re-marking a completed lesson returns the existing row untouched and
    /// does not recompute. If the recompute fails the progress row stays
    /// written and the error is returned.
    pub fn mark_complete(
        &self,
        learner_id: &str,
        lesson_id: &str,
    ) -> Result<LessonProgress, EngineError> {
        let existing = self.get_progress(learner_id, lesson_id)?;
        if let Some(ref progress) = existing {
            if progress.is_completed {
                debug!(learner = %learner_id, lesson = %lesson_id, "Lesson already completed");
                return Ok(progress.clone());
            }
        }

        let course_id = self.catalog.course_for_lesson(lesson_id)?;
        let now = current_timestamp();

        let progress = match existing {
            Some(progress) => db::patch(
                self.store.as_ref(),
                &progress.id,
                json!({ "is_completed": true, "completed_at": now }),
            )?,
            None => db::insert(
                self.store.as_ref(),
                &LessonProgress {
                    id: Uuid::new_v4().to_string(),
                    learner_id: learner_id.to_string(),
                    lesson_id: lesson_id.to_string(),
                    is_completed: true,
                    completed_at: Some(now.clone()),
                    created_at: now,
                },
            )?,
        };

        self.events.emit(EngineEvent::LessonCompleted {
            learner_id: learner_id.to_string(),
            lesson_id: lesson_id.to_string(),
        });

        self.enrollments.recompute_progress(learner_id, &course_id)?;

        Ok(progress)
    }
}
