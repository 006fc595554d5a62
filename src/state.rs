use std::sync::Arc;

use crate::repository::EventRepository;
use crate::spec::SpecStore;

/// Shared per-process state handed to every operation handler.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn EventRepository>,
    pub spec: Arc<SpecStore>,
}
