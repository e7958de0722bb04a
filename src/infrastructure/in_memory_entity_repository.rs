use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    domain::{
        entity::{Address, DateRecord, Entity, Name},
        errors::DomainError,
        search::EntitySearch,
    },
    infrastructure::EntityRepository,
};

/// Keeps the aggregate in table-shaped state: one map of entity rows plus one
/// row vector per child table, each child row pointing at its parent by id.
/// Every operation holds the write lock for its whole duration, which makes it
/// a single persistence unit.
#[derive(Default)]
pub struct InMemoryEntityRepository {
    tables: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
    entities: BTreeMap<String, EntityRow>,
    addresses: Vec<Address>,
    names: Vec<Name>,
    dates: Vec<DateRecord>,
    next_address_id: i64,
}

#[derive(Clone)]
struct EntityRow {
    gender: Option<String>,
    deceased: bool,
}

impl InMemoryEntityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of child rows across all three child tables.
    pub async fn child_row_count(&self) -> usize {
        let tables = self.tables.read().await;
        tables.addresses.len() + tables.names.len() + tables.dates.len()
    }
}

impl Tables {
    fn assemble(&self, id: &str) -> Option<Entity> {
        let row = self.entities.get(id)?;

        Some(Entity {
            id: id.to_string(),
            gender: row.gender.clone(),
            deceased: row.deceased,
            addresses: self
                .addresses
                .iter()
                .filter(|address| address.entity_id == id)
                .cloned()
                .collect(),
            names: self
                .names
                .iter()
                .filter(|name| name.entity_id == id)
                .cloned()
                .collect(),
            dates: self
                .dates
                .iter()
                .filter(|date| date.entity_id == id)
                .cloned()
                .collect(),
        })
    }

    fn insert_addresses(&mut self, addresses: Vec<Address>) {
        for mut address in addresses {
            self.next_address_id += 1;
            address.id = Some(self.next_address_id);
            self.addresses.push(address);
        }
    }

    fn remove_addresses(&mut self, id: &str) {
        self.addresses.retain(|address| address.entity_id != id);
    }

    fn remove_names(&mut self, id: &str) {
        self.names.retain(|name| name.entity_id != id);
    }

    fn remove_dates(&mut self, id: &str) {
        self.dates.retain(|date| date.entity_id != id);
    }
}

#[async_trait]
impl EntityRepository for InMemoryEntityRepository {
    async fn init(&self) -> Result<(), DomainError> {
        Ok(())
    }

    async fn create(&self, mut entity: Entity) -> Result<(), DomainError> {
        let mut tables = self.tables.write().await;
        if tables.entities.contains_key(&entity.id) {
            return Err(DomainError::conflict(format!(
                "entity '{}' already exists",
                entity.id
            )));
        }

        entity.adopt_children();
        tables.entities.insert(
            entity.id,
            EntityRow {
                gender: entity.gender,
                deceased: entity.deceased,
            },
        );
        tables.insert_addresses(entity.addresses);
        tables.names.extend(entity.names);
        tables.dates.extend(entity.dates);

        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Entity>, DomainError> {
        Ok(self.tables.read().await.assemble(id))
    }

    async fn update(&self, entity: Entity) -> Result<(), DomainError> {
        let mut tables = self.tables.write().await;
        let Some(mut existing) = tables.assemble(&entity.id) else {
            debug!(entity_id = %entity.id, "update skipped, entity does not exist");
            return Ok(());
        };

        let changes = existing.reconcile(entity);
        let id = existing.id.clone();

        tables.entities.insert(
            id.clone(),
            EntityRow {
                gender: existing.gender,
                deceased: existing.deceased,
            },
        );
        if changes.addresses {
            tables.remove_addresses(&id);
            tables.insert_addresses(existing.addresses);
        }
        if changes.names {
            tables.remove_names(&id);
            tables.names.extend(existing.names);
        }
        if changes.dates {
            tables.remove_dates(&id);
            tables.dates.extend(existing.dates);
        }

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), DomainError> {
        let mut tables = self.tables.write().await;
        if !tables.entities.contains_key(id) {
            debug!(entity_id = %id, "delete skipped, entity does not exist");
            return Ok(());
        }

        tables.remove_addresses(id);
        tables.remove_dates(id);
        tables.remove_names(id);
        tables.entities.remove(id);

        Ok(())
    }

    async fn search(&self, search: EntitySearch) -> Result<Vec<Entity>, DomainError> {
        let tables = self.tables.read().await;
        let entities = tables
            .entities
            .keys()
            .filter_map(|id| tables.assemble(id))
            .collect::<Vec<_>>();

        Ok(search.apply(entities))
    }
}
