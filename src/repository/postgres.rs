use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use crate::models::{self, CreateEvent, EventRecord, UpdateEvent};
use crate::spec::{SpecError, SpecStore, Validator};

use super::{default_id_generator, EventRepository, IdGenerator, RepoError, RepoResult, INSERT_RETRIES};

const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL-backed repository. Records are validated against the storage
/// schema (the contract's `Event` schema plus the timestamp columns) before
/// they reach the database.
pub struct PgEventRepository {
    pool: PgPool,
    validator: Arc<dyn Validator>,
    storage_schema: Value,
    id_gen: IdGenerator,
}

impl PgEventRepository {
    /// Fails when the contract document lacks the `Event` schema, which is a
    /// startup-time configuration error.
    pub fn new(
        pool: PgPool,
        store: &SpecStore,
        validator: Arc<dyn Validator>,
    ) -> Result<Self, SpecError> {
        let storage_schema = models::storage_schema(store)?;
        Ok(Self {
            pool,
            validator,
            storage_schema,
            id_gen: default_id_generator(),
        })
    }

    /// Replaces the id source; the in-memory twin offers the same hook.
    pub fn with_id_generator(mut self, id_gen: IdGenerator) -> Self {
        self.id_gen = id_gen;
        self
    }

    fn validate_record(&self, record: &EventRecord) -> RepoResult<()> {
        self.validator
            .validate(&self.storage_schema, &record.storage_value())
            .map_err(RepoError::Validation)
    }

    async fn insert(&self, record: &EventRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO events \
             (id, title, description, start_date, end_date, location, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&record.id)
        .bind(&record.title)
        .bind(&record.description)
        .bind(record.start_date)
        .bind(record.end_date)
        .bind(&record.location)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn list(&self) -> RepoResult<Vec<EventRecord>> {
        let records = sqlx::query_as::<_, EventRecord>(
            "SELECT id, title, description, start_date, end_date, location, \
             created_at, updated_at FROM events ORDER BY start_date ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn create(&self, input: CreateEvent) -> RepoResult<EventRecord> {
        let client_supplied_id = input.id.is_some();
        let mut record = EventRecord::prepare_insert_with(input, &*self.id_gen);
        self.validate_record(&record)?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.insert(&record).await {
                Ok(()) => return Ok(record),
                Err(err) if is_unique_violation(&err) => {
                    if client_supplied_id || attempts >= INSERT_RETRIES {
                        return Err(RepoError::Conflict(record.id));
                    }
                    tracing::warn!(
                        id = %record.id,
                        attempts,
                        "Generated event id collided, retrying with a fresh one"
                    );
                    record.id = (self.id_gen)();
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn get(&self, id: &str) -> RepoResult<Option<EventRecord>> {
        let record = sqlx::query_as::<_, EventRecord>(
            "SELECT id, title, description, start_date, end_date, location, \
             created_at, updated_at FROM events WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn update(&self, id: &str, patch: UpdateEvent) -> RepoResult<Option<EventRecord>> {
        let Some(mut record) = self.get(id).await? else {
            return Ok(None);
        };

        record.apply_update(patch);
        self.validate_record(&record)?;

        sqlx::query(
            "UPDATE events SET title = $2, description = $3, start_date = $4, \
             end_date = $5, location = $6, updated_at = $7 WHERE id = $1",
        )
        .bind(&record.id)
        .bind(&record.title)
        .bind(&record.description)
        .bind(record.start_date)
        .bind(record.end_date)
        .bind(&record.location)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(Some(record))
    }

    async fn delete(&self, id: &str) -> RepoResult<u64> {
        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == UNIQUE_VIOLATION)
        .unwrap_or(false)
}
