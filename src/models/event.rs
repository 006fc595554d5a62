use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::FromRow;

use crate::spec::{SpecError, SpecStore};

/// Name of the entity's schema in the contract document.
pub const EVENT_SCHEMA_NAME: &str = "Event";

const ID_PREFIX: &str = "evt_";
const ID_SUFFIX_LEN: usize = 12;

/// Client-visible shape of an event. Optional fields are omitted from JSON
/// when unset, so responses stay schema-conformant without null padding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Payload of a create request. A client-chosen `id` is preserved verbatim;
/// the database's primary-key constraint catches collisions.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEvent {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Partial update. Absent fields are left untouched; an explicit `null` on
/// a nullable field clears it, so those fields are double-wrapped to keep
/// the two cases apart.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable_field")]
    pub description: Option<Option<String>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "nullable_field")]
    pub location: Option<Option<String>>,
}

/// Maps a present-but-null field to `Some(None)`; an absent field stays
/// `None` via the serde default.
fn nullable_field<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Storage shape of an event: the client-visible fields plus the two
/// storage-only timestamps. Never serialized into an API response.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventRecord {
    /// Insert-time lifecycle hook: stamps both timestamps with the same
    /// instant and assigns a fresh id only when the caller supplied none.
    pub fn prepare_insert(input: CreateEvent) -> Self {
        Self::prepare_insert_with(input, generate_event_id)
    }

    /// `prepare_insert` with an explicit id source.
    pub fn prepare_insert_with(input: CreateEvent, id_gen: impl Fn() -> String) -> Self {
        let now = Utc::now();
        Self {
            id: input.id.unwrap_or_else(id_gen),
            title: input.title,
            description: input.description,
            start_date: input.start_date,
            end_date: input.end_date,
            location: input.location,
            created_at: now,
            updated_at: now,
        }
    }

    /// Update-time lifecycle hook: applies the supplied fields and refreshes
    /// `updated_at`. `id` and `created_at` are never touched.
    pub fn apply_update(&mut self, patch: UpdateEvent) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(start_date) = patch.start_date {
            self.start_date = start_date;
        }
        if let Some(end_date) = patch.end_date {
            self.end_date = end_date;
        }
        if let Some(location) = patch.location {
            self.location = location;
        }
        self.updated_at = Utc::now();
    }

    /// Strips the storage-only timestamps for the API response.
    pub fn client_view(self) -> Event {
        Event {
            id: self.id,
            title: self.title,
            description: self.description,
            start_date: self.start_date,
            end_date: self.end_date,
            location: self.location,
        }
    }

    /// JSON form used for validation against the storage schema.
    pub fn storage_value(&self) -> Value {
        serde_json::to_value(self).expect("event record serializes to JSON")
    }
}

/// Generates `evt_` plus a random alphanumeric suffix. Collisions are not
/// checked here; inserts rely on the primary-key constraint and retry with a
/// fresh id (see the repository).
pub fn generate_event_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{}{}", ID_PREFIX, suffix)
}

/// The contract's `Event` schema extended with the storage-only timestamp
/// properties. A missing `Event` schema means the contract itself is broken,
/// which is a configuration error rather than a per-request one.
pub fn storage_schema(store: &SpecStore) -> Result<Value, SpecError> {
    let mut schema = store
        .schema(EVENT_SCHEMA_NAME)?
        .ok_or_else(|| SpecError::SchemaNotFound(EVENT_SCHEMA_NAME.to_owned()))?;

    if let Some(schema) = schema.as_object_mut() {
        let properties = schema
            .entry("properties")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(properties) = properties.as_object_mut() {
            properties.insert(
                "createdAt".to_owned(),
                json!({ "type": "string", "format": "date-time" }),
            );
            properties.insert(
                "updatedAt".to_owned(),
                json!({ "type": "string", "format": "date-time" }),
            );
        }
    }

    // `required` stays untouched: storage-only fields are never required
    // from callers.
    Ok(schema)
}
