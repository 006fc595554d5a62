use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{self, CreateEvent, EventRecord, UpdateEvent};
use crate::spec::{FieldIssue, SpecError};
use crate::utils::error::AppError;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryEventRepository;
pub use postgres::PgEventRepository;

/// How many times an insert with a generated id retries after a primary-key
/// collision before giving up. Client-supplied ids never retry.
pub const INSERT_RETRIES: u32 = 3;

/// Source of generated event ids. Injectable so collision handling can be
/// driven deterministically in tests.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

pub fn default_id_generator() -> IdGenerator {
    Arc::new(models::generate_event_id)
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("event '{0}' already exists")]
    Conflict(String),

    #[error("event record failed schema validation")]
    Validation(Vec<FieldIssue>),

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Conflict(id) => {
                AppError::Conflict(format!("Event with id '{}' already exists", id))
            }
            RepoError::Validation(details) => AppError::Validation(details),
            RepoError::Spec(e) => AppError::Spec(e),
            RepoError::Database(e) => AppError::Database(e),
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Persistence boundary for events.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// All events, ordered by start date ascending.
    async fn list(&self) -> RepoResult<Vec<EventRecord>>;

    /// Inserts a new event, assigning an id when the caller supplied none.
    async fn create(&self, input: CreateEvent) -> RepoResult<EventRecord>;

    /// Finds an event by id.
    async fn get(&self, id: &str) -> RepoResult<Option<EventRecord>>;

    /// Applies a partial update and returns the updated record, or `None`
    /// when no event with the given id exists.
    async fn update(&self, id: &str, patch: UpdateEvent) -> RepoResult<Option<EventRecord>>;

    /// Deletes by id, returning the number of affected rows.
    async fn delete(&self, id: &str) -> RepoResult<u64>;
}
