use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{CreateEvent, EventRecord, UpdateEvent};

use super::{default_id_generator, EventRepository, IdGenerator, RepoError, RepoResult, INSERT_RETRIES};

/// In-memory implementation used by tests and local development. Observable
/// semantics match the Postgres implementation: list ordering, conflicts on
/// duplicate ids, affected-row counts.
#[derive(Clone)]
pub struct InMemoryEventRepository {
    events: Arc<RwLock<HashMap<String, EventRecord>>>,
    id_gen: IdGenerator,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::with_id_generator(default_id_generator())
    }

    /// Repository with a custom id source; tests use it to force collisions.
    pub fn with_id_generator(id_gen: IdGenerator) -> Self {
        Self {
            events: Arc::new(RwLock::new(HashMap::new())),
            id_gen,
        }
    }
}

impl Default for InMemoryEventRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn list(&self) -> RepoResult<Vec<EventRecord>> {
        let events = self.events.read().await;
        let mut records: Vec<EventRecord> = events.values().cloned().collect();
        records.sort_by(|a, b| a.start_date.cmp(&b.start_date));
        Ok(records)
    }

    async fn create(&self, input: CreateEvent) -> RepoResult<EventRecord> {
        let client_supplied_id = input.id.is_some();
        let mut record = EventRecord::prepare_insert_with(input, &*self.id_gen);

        let mut events = self.events.write().await;
        let mut attempts = 0;
        while events.contains_key(&record.id) {
            attempts += 1;
            if client_supplied_id || attempts >= INSERT_RETRIES {
                return Err(RepoError::Conflict(record.id));
            }
            record.id = (self.id_gen)();
        }

        events.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> RepoResult<Option<EventRecord>> {
        let events = self.events.read().await;
        Ok(events.get(id).cloned())
    }

    async fn update(&self, id: &str, patch: UpdateEvent) -> RepoResult<Option<EventRecord>> {
        let mut events = self.events.write().await;
        match events.get_mut(id) {
            Some(record) => {
                record.apply_update(patch);
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &str) -> RepoResult<u64> {
        let mut events = self.events.write().await;
        Ok(if events.remove(id).is_some() { 1 } else { 0 })
    }
}
