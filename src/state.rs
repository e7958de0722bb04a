use std::sync::Arc;

use crate::application::entity_service::EntityService;

#[derive(Clone)]
pub struct AppState {
    pub entity_service: Arc<EntityService>,
}

impl AppState {
    pub fn new(entity_service: Arc<EntityService>) -> Self {
        Self { entity_service }
    }
}
