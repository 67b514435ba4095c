//! Catalog service - read access to courses, modules and lessons
//!
//! Course content is authored elsewhere; the engine reads the hierarchy to
//! count lessons and map a lesson to its course. The create operations exist
//! for seeding and tests.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::models::{current_timestamp, fields, Course, CourseModule, Lesson};
use crate::db::{self, RecordQuery, RecordStore};
use crate::error::EngineError;

/// Module with its ordered lessons
#[derive(Debug, Clone, Serialize)]
pub struct ModuleOutline {
    pub module: CourseModule,
    pub lessons: Vec<Lesson>,
}

/// Course with its ordered modules and lessons
#[derive(Debug, Clone, Serialize)]
pub struct CourseOutline {
    pub course: Course,
    pub modules: Vec<ModuleOutline>,
}

impl CourseOutline {
    pub fn lesson_count(&self) -> usize {
        self.modules.iter().map(|m| m.lessons.len()).sum()
    }
}

/// Catalog service
pub struct CatalogService {
    store: Arc<dyn RecordStore>,
    config: Arc<EngineConfig>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn RecordStore>, config: Arc<EngineConfig>) -> Self {
        Self { store, config }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get_course(&self, id: &str) -> Result<Course, EngineError> {
        db::fetch(self.store.as_ref(), id)
    }

    pub fn get_module(&self, id: &str) -> Result<CourseModule, EngineError> {
        db::fetch(self.store.as_ref(), id)
    }

    pub fn get_lesson(&self, id: &str) -> Result<Lesson, EngineError> {
        db::fetch(self.store.as_ref(), id)
    }

    /// Modules of a course in display order
    pub fn modules(&self, course_id: &str) -> Result<Vec<CourseModule>, EngineError> {
        db::find(
            self.store.as_ref(),
            &RecordQuery::new()
                .filter(fields::COURSE_ID, course_id)
                .sort_asc(fields::ORDER_INDEX),
        )
    }

    /// Lessons of a module in display order
    pub fn lessons(&self, module_id: &str) -> Result<Vec<Lesson>, EngineError> {
        db::find(
            self.store.as_ref(),
            &RecordQuery::new()
                .filter(fields::MODULE_ID, module_id)
                .sort_asc(fields::ORDER_INDEX),
        )
    }

    /// Full course hierarchy
    pub fn outline(&self, course_id: &str) -> Result<CourseOutline, EngineError> {
        let course = self.get_course(course_id)?;
        let modules = self
            .modules(course_id)?
            .into_iter()
            .map(|module| {
                let lessons = self.lessons(&module.id)?;
                Ok(ModuleOutline { module, lessons })
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        Ok(CourseOutline { course, modules })
    }

    /// IDs of every lesson across all modules of a course
    pub fn lesson_ids(&self, course_id: &str) -> Result<Vec<String>, EngineError> {
        let mut ids = Vec::new();
        for module in self.modules(course_id)? {
            ids.extend(self.lessons(&module.id)?.into_iter().map(|l| l.id));
        }
        Ok(ids)
    }

    /// Course owning a lesson
    pub fn course_for_lesson(&self, lesson_id: &str) -> Result<String, EngineError> {
        let lesson = self.get_lesson(lesson_id)?;
        let module = self.get_module(&lesson.module_id)?;
        Ok(module.course_id)
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    pub fn create_course(
        &self,
        title: &str,
        description: Option<&str>,
    ) -> Result<Course, EngineError> {
        self.validate_title(title)?;

        let course = Course {
            id: Uuid::new_v4().to_string(),
            title: title.trim().to_string(),
            description: description.map(str::to_string),
            created_at: current_timestamp(),
        };
        debug!(id = %course.id, title = %course.title, "Creating course");
        db::insert(self.store.as_ref(), &course)
    }

    /// Append a module to a course
    pub fn add_module(&self, course_id: &str, title: &str) -> Result<CourseModule, EngineError> {
        self.validate_title(title)?;
        self.get_course(course_id)?;

        let order_index = self.modules(course_id)?.len() as u32;
        let module = CourseModule {
            id: Uuid::new_v4().to_string(),
            course_id: course_id.to_string(),
            title: title.trim().to_string(),
            order_index,
            created_at: current_timestamp(),
        };
        db::insert(self.store.as_ref(), &module)
    }

    /// Append a lesson to a module
    pub fn add_lesson(&self, module_id: &str, title: &str) -> Result<Lesson, EngineError> {
        self.validate_title(title)?;
        self.get_module(module_id)?;

        let order_index = self.lessons(module_id)?.len() as u32;
        let lesson = Lesson {
            id: Uuid::new_v4().to_string(),
            module_id: module_id.to_string(),
            title: title.trim().to_string(),
            order_index,
            created_at: current_timestamp(),
        };
        db::insert(self.store.as_ref(), &lesson)
    }

    fn validate_title(&self, title: &str) -> Result<(), EngineError> {
        if title.trim().is_empty() {
            return Err(EngineError::InvalidInput("title is required".into()));
        }
        if title.chars().count() > self.config.max_title_len {
            return Err(EngineError::InvalidInput(format!(
                "title must be <= {} characters",
                self.config.max_title_len
            )));
        }
        Ok(())
    }
}
