use std::sync::Arc;

use tracing::debug;

use crate::{
    application::dto::{EntityDto, ListEntitiesQueryRequest},
    domain::{entity::Entity, errors::DomainError},
    infrastructure::EntityRepository,
};

/// Boundary of the core. Converts transport payloads into domain values and
/// delegates to the repository; payload validation happens before a call
/// reaches this type.
#[derive(Clone)]
pub struct EntityService {
    repository: Arc<dyn EntityRepository>,
}

impl EntityService {
    pub fn new(repository: Arc<dyn EntityRepository>) -> Self {
        Self { repository }
    }

    pub async fn create_entity(&self, request: EntityDto) -> Result<(), DomainError> {
        let entity = Entity::from(request);
        debug!(entity_id = %entity.id, "creating entity");
        self.repository.create(entity).await
    }

    pub async fn update_entity(&self, request: EntityDto) -> Result<(), DomainError> {
        let entity = Entity::from(request);
        debug!(entity_id = %entity.id, "updating entity");
        self.repository.update(entity).await
    }

    pub async fn delete_entity(&self, id: &str) -> Result<(), DomainError> {
        debug!(entity_id = %id, "deleting entity");
        self.repository.delete(id).await
    }

    pub async fn get_entity_by_id(&self, id: &str) -> Result<Option<Entity>, DomainError> {
        self.repository.get_by_id(id).await
    }

    pub async fn get_all_entities(
        &self,
        query: ListEntitiesQueryRequest,
    ) -> Result<Vec<Entity>, DomainError> {
        self.repository.search(query.into_domain()).await
    }
}
