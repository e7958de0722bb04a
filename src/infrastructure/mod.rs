use async_trait::async_trait;

use crate::domain::{entity::Entity, errors::DomainError, search::EntitySearch};

pub mod in_memory_entity_repository;
pub mod postgres_entity_repository;
pub mod postgres_search;
pub mod retry;

/// Persistence of the entity aggregate and its child collections.
///
/// `update` and `delete` of an id that does not exist succeed without
/// touching the store.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    async fn init(&self) -> Result<(), DomainError>;
    async fn create(&self, entity: Entity) -> Result<(), DomainError>;
    async fn get_by_id(&self, id: &str) -> Result<Option<Entity>, DomainError>;
    async fn update(&self, entity: Entity) -> Result<(), DomainError>;
    async fn delete(&self, id: &str) -> Result<(), DomainError>;
    async fn search(&self, search: EntitySearch) -> Result<Vec<Entity>, DomainError>;
}
