use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool, Postgres, QueryBuilder, migrate::MigrateError};
use tracing::debug;

use crate::{
    domain::{
        entity::{Address, DateRecord, Entity, Name},
        errors::DomainError,
        search::{EntitySearch, fold_case},
    },
    infrastructure::{EntityRepository, postgres_search::build_search_query},
};

#[derive(Clone)]
pub struct PgEntityRepository {
    pool: PgPool,
}

impl PgEntityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct EntityRow {
    id: String,
    gender: Option<String>,
    deceased: bool,
}

#[derive(Debug, FromRow)]
struct AddressRow {
    id: i64,
    entity_id: String,
    address_line: Option<String>,
    city: Option<String>,
    country: Option<String>,
}

#[derive(Debug, FromRow)]
struct NameRow {
    entity_id: String,
    first_name: Option<String>,
    middle_name: Option<String>,
    surname: Option<String>,
}

#[derive(Debug, FromRow)]
struct DateRow {
    entity_id: String,
    date_type: String,
    date: Option<DateTime<Utc>>,
}

#[async_trait]
impl EntityRepository for PgEntityRepository {
    async fn init(&self) -> Result<(), DomainError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(map_migrate_error)
    }

    async fn create(&self, mut entity: Entity) -> Result<(), DomainError> {
        entity.adopt_children();

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("INSERT INTO entities (id, gender, deceased) VALUES ($1, $2, $3)")
            .bind(&entity.id)
            .bind(&entity.gender)
            .bind(entity.deceased)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        insert_addresses(&mut tx, &entity.addresses).await?;
        insert_names(&mut tx, &entity.names).await?;
        insert_dates(&mut tx, &entity.dates).await?;

        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Entity>, DomainError> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        fetch_aggregate(&mut conn, id, false).await
    }

    async fn update(&self, entity: Entity) -> Result<(), DomainError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let Some(mut existing) = fetch_aggregate(&mut tx, &entity.id, true).await? else {
            debug!(entity_id = %entity.id, "update skipped, entity does not exist");
            return tx.commit().await.map_err(map_sqlx_error);
        };

        let changes = existing.reconcile(entity);

        sqlx::query("UPDATE entities SET gender = $1, deceased = $2 WHERE id = $3")
            .bind(&existing.gender)
            .bind(existing.deceased)
            .bind(&existing.id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        if changes.addresses {
            delete_children(&mut tx, "entity_addresses", &existing.id).await?;
            insert_addresses(&mut tx, &existing.addresses).await?;
        }
        if changes.names {
            delete_children(&mut tx, "entity_names", &existing.id).await?;
            insert_names(&mut tx, &existing.names).await?;
        }
        if changes.dates {
            delete_children(&mut tx, "entity_dates", &existing.id).await?;
            insert_dates(&mut tx, &existing.dates).await?;
        }

        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn delete(&self, id: &str) -> Result<(), DomainError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let locked =
            sqlx::query_scalar::<_, String>("SELECT id FROM entities WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

        if locked.is_none() {
            debug!(entity_id = %id, "delete skipped, entity does not exist");
            return tx.commit().await.map_err(map_sqlx_error);
        }

        delete_children(&mut tx, "entity_addresses", id).await?;
        delete_children(&mut tx, "entity_dates", id).await?;
        delete_children(&mut tx, "entity_names", id).await?;

        sqlx::query("DELETE FROM entities WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn search(&self, search: EntitySearch) -> Result<Vec<Entity>, DomainError> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;

        let mut builder = build_search_query(&search)?;
        let rows = builder
            .build_query_as::<EntityRow>()
            .fetch_all(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

        assemble(&mut conn, rows).await
    }
}

async fn fetch_aggregate(
    conn: &mut PgConnection,
    id: &str,
    for_update: bool,
) -> Result<Option<Entity>, DomainError> {
    let sql = if for_update {
        "SELECT id, gender, deceased FROM entities WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT id, gender, deceased FROM entities WHERE id = $1"
    };

    let Some(row) = sqlx::query_as::<_, EntityRow>(sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?
    else {
        return Ok(None);
    };

    Ok(assemble(conn, vec![row]).await?.pop())
}

/// Loads the child collections of the given parent rows with one query per
/// child table and attaches them, keeping both the parent order and each
/// collection's insertion order.
async fn assemble(
    conn: &mut PgConnection,
    rows: Vec<EntityRow>,
) -> Result<Vec<Entity>, DomainError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids = rows.iter().map(|row| row.id.clone()).collect::<Vec<_>>();

    let addresses = sqlx::query_as::<_, AddressRow>(
        r#"
        SELECT id, entity_id, address_line, city, country
        FROM entity_addresses
        WHERE entity_id = ANY($1)
        ORDER BY id
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    let names = sqlx::query_as::<_, NameRow>(
        r#"
        SELECT entity_id, first_name, middle_name, surname
        FROM entity_names
        WHERE entity_id = ANY($1)
        ORDER BY id
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    let dates = sqlx::query_as::<_, DateRow>(
        r#"
        SELECT entity_id, date_type, date
        FROM entity_dates
        WHERE entity_id = ANY($1)
        ORDER BY id
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    let mut entities = rows.into_iter().map(row_to_entity).collect::<Vec<_>>();
    let position = entities
        .iter()
        .enumerate()
        .map(|(index, entity)| (entity.id.clone(), index))
        .collect::<HashMap<_, _>>();

    for address in addresses {
        if let Some(&index) = position.get(&address.entity_id) {
            entities[index].addresses.push(Address {
                id: Some(address.id),
                entity_id: address.entity_id,
                address_line: address.address_line,
                city: address.city,
                country: address.country,
            });
        }
    }
    for name in names {
        if let Some(&index) = position.get(&name.entity_id) {
            entities[index].names.push(Name {
                entity_id: name.entity_id,
                first_name: name.first_name,
                middle_name: name.middle_name,
                surname: name.surname,
            });
        }
    }
    for date in dates {
        if let Some(&index) = position.get(&date.entity_id) {
            entities[index].dates.push(DateRecord {
                entity_id: date.entity_id,
                date_type: date.date_type,
                date: date.date,
            });
        }
    }

    Ok(entities)
}

fn row_to_entity(row: EntityRow) -> Entity {
    Entity {
        id: row.id,
        gender: row.gender,
        deceased: row.deceased,
        ..Entity::default()
    }
}

async fn insert_addresses(
    conn: &mut PgConnection,
    addresses: &[Address],
) -> Result<(), DomainError> {
    if addresses.is_empty() {
        return Ok(());
    }

    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO entity_addresses \
         (entity_id, address_line, city, country, address_line_folded, country_folded) ",
    );
    builder.push_values(addresses, |mut row, address| {
        row.push_bind(address.entity_id.clone())
            .push_bind(address.address_line.clone())
            .push_bind(address.city.clone())
            .push_bind(address.country.clone())
            .push_bind(folded(address.address_line.as_deref()))
            .push_bind(folded(address.country.as_deref()));
    });

    builder
        .build()
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

async fn insert_names(conn: &mut PgConnection, names: &[Name]) -> Result<(), DomainError> {
    if names.is_empty() {
        return Ok(());
    }

    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO entity_names (entity_id, first_name, middle_name, surname, \
         first_name_folded, middle_name_folded, surname_folded) ",
    );
    builder.push_values(names, |mut row, name| {
        row.push_bind(name.entity_id.clone())
            .push_bind(name.first_name.clone())
            .push_bind(name.middle_name.clone())
            .push_bind(name.surname.clone())
            .push_bind(folded(name.first_name.as_deref()))
            .push_bind(folded(name.middle_name.as_deref()))
            .push_bind(folded(name.surname.as_deref()));
    });

    builder
        .build()
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

async fn insert_dates(conn: &mut PgConnection, dates: &[DateRecord]) -> Result<(), DomainError> {
    if dates.is_empty() {
        return Ok(());
    }

    let mut builder =
        QueryBuilder::<Postgres>::new("INSERT INTO entity_dates (entity_id, date_type, date) ");
    builder.push_values(dates, |mut row, date| {
        row.push_bind(date.entity_id.clone())
            .push_bind(date.date_type.clone())
            .push_bind(date.date);
    });

    builder
        .build()
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

fn folded(value: Option<&str>) -> Option<String> {
    value.map(fold_case)
}

async fn delete_children(
    conn: &mut PgConnection,
    table: &'static str,
    entity_id: &str,
) -> Result<(), DomainError> {
    let mut builder = QueryBuilder::<Postgres>::new("DELETE FROM ");
    builder
        .push(table)
        .push(" WHERE entity_id = ")
        .push_bind(entity_id.to_string());

    builder
        .build()
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

/// Sorts store failures into the domain taxonomy. Connectivity and timeout
/// failures become transient errors and are retried; everything else is not.
pub fn map_sqlx_error(error: sqlx::Error) -> DomainError {
    match &error {
        sqlx::Error::Database(db_error) => match db_error.code().as_deref() {
            Some("23505") => DomainError::conflict(db_error.message().to_string()),
            // query_canceled, raised by statement_timeout
            Some("57014") => DomainError::timeout(db_error.to_string()),
            Some(code) if code.starts_with("08") || code == "57P01" || code == "57P03" => {
                DomainError::unavailable(db_error.to_string())
            }
            _ => DomainError::storage(db_error.to_string()),
        },
        sqlx::Error::PoolTimedOut => DomainError::timeout(error.to_string()),
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::WorkerCrashed => {
            DomainError::unavailable(error.to_string())
        }
        _ => DomainError::storage(error.to_string()),
    }
}

fn map_migrate_error(error: MigrateError) -> DomainError {
    match error {
        MigrateError::Execute(inner) => map_sqlx_error(inner),
        other => DomainError::storage(format!("migration failed: {other}")),
    }
}
