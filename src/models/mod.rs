pub mod event;

pub use event::{
    generate_event_id, storage_schema, CreateEvent, Event, EventRecord, UpdateEvent,
    EVENT_SCHEMA_NAME,
};
