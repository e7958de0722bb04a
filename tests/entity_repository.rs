use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use trades_entity_api::{
    domain::{
        entity::{Address, DateRecord, Entity, Name},
        errors::DomainError,
        search::{EntitySearch, EntitySort, Page, SearchFilters, SortKey, SortOrder},
    },
    infrastructure::{
        EntityRepository,
        in_memory_entity_repository::InMemoryEntityRepository,
        retry::{RetryPolicy, RetryingEntityRepository},
    },
};

fn repository() -> RetryingEntityRepository {
    RetryingEntityRepository::new(
        Arc::new(InMemoryEntityRepository::new()),
        RetryPolicy::default(),
    )
}

fn address(line: &str, city: &str, country: &str) -> Address {
    Address {
        address_line: Some(line.to_string()),
        city: Some(city.to_string()),
        country: Some(country.to_string()),
        ..Address::default()
    }
}

fn name(first: &str, surname: &str) -> Name {
    Name {
        first_name: Some(first.to_string()),
        surname: Some(surname.to_string()),
        ..Name::default()
    }
}

fn dated(id: &str, offset_days: i64) -> Entity {
    Entity {
        id: id.to_string(),
        dates: vec![DateRecord {
            date_type: "DOB".to_string(),
            date: Some(Utc::now() + ChronoDuration::days(offset_days)),
            ..DateRecord::default()
        }],
        ..Entity::default()
    }
}

fn ids(entities: &[Entity]) -> Vec<&str> {
    entities.iter().map(|entity| entity.id.as_str()).collect()
}

#[tokio::test]
async fn created_graph_round_trips_with_stamped_children() {
    let repo = repository();
    let created = Entity {
        id: "E1".to_string(),
        gender: Some("Female".to_string()),
        deceased: false,
        addresses: vec![
            address("1 Main St", "Leeds", "UK"),
            address("2 High St", "York", "UK"),
        ],
        names: vec![name("Ann", "Lee")],
        dates: vec![DateRecord {
            date_type: "DOB".to_string(),
            date: Some(Utc::now()),
            ..DateRecord::default()
        }],
    };

    repo.create(created.clone()).await.expect("create succeeds");
    let stored = repo
        .get_by_id("E1")
        .await
        .expect("get succeeds")
        .expect("entity exists");

    assert_eq!(stored.gender, created.gender);
    assert_eq!(stored.addresses.len(), 2);
    assert_eq!(stored.addresses[0].address_line.as_deref(), Some("1 Main St"));
    assert_eq!(stored.addresses[1].address_line.as_deref(), Some("2 High St"));
    assert!(stored.addresses.iter().all(|a| a.id.is_some()));
    assert!(stored.addresses.iter().all(|a| a.entity_id == "E1"));
    assert!(stored.names.iter().all(|n| n.entity_id == "E1"));
    assert!(stored.dates.iter().all(|d| d.entity_id == "E1"));
    assert_eq!(stored.names, vec![Name { entity_id: "E1".to_string(), ..name("Ann", "Lee") }]);
    assert_eq!(stored.dates[0].date, created.dates[0].date);
}

#[tokio::test]
async fn updating_a_missing_entity_is_a_silent_no_op() {
    let repo = repository();

    repo.update(Entity {
        id: "ghost".to_string(),
        ..Entity::default()
    })
    .await
    .expect("update of a missing id succeeds");

    assert!(repo.get_by_id("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn update_replaces_only_non_empty_collections() {
    let repo = repository();
    repo.create(Entity {
        id: "E1".to_string(),
        gender: Some("Male".to_string()),
        deceased: false,
        addresses: vec![address("1 Main St", "Leeds", "UK")],
        names: vec![name("Bob", "Smith")],
        ..Entity::default()
    })
    .await
    .unwrap();

    repo.update(Entity {
        id: "E1".to_string(),
        gender: Some("   ".to_string()),
        deceased: true,
        addresses: Vec::new(),
        names: vec![name("Robert", "Smith"), name("Bobby", "Smith")],
        ..Entity::default()
    })
    .await
    .expect("update succeeds");

    let stored = repo.get_by_id("E1").await.unwrap().unwrap();
    assert!(stored.deceased);
    assert_eq!(stored.gender.as_deref(), Some("Male"));
    assert_eq!(stored.addresses.len(), 1);
    assert_eq!(stored.addresses[0].city.as_deref(), Some("Leeds"));
    assert_eq!(stored.names.len(), 2);
    assert_eq!(stored.names[0].first_name.as_deref(), Some("Robert"));

    repo.update(Entity {
        id: "E1".to_string(),
        gender: Some("Female".to_string()),
        deceased: false,
        addresses: vec![address("9 Low Rd", "Hull", "UK")],
        ..Entity::default()
    })
    .await
    .expect("update succeeds");

    let stored = repo.get_by_id("E1").await.unwrap().unwrap();
    assert!(!stored.deceased);
    assert_eq!(stored.gender.as_deref(), Some("Female"));
    assert_eq!(stored.addresses.len(), 1);
    assert_eq!(stored.addresses[0].city.as_deref(), Some("Hull"));
    assert_eq!(stored.names.len(), 2);
}

#[tokio::test]
async fn delete_removes_the_whole_graph() {
    let inner = Arc::new(InMemoryEntityRepository::new());
    let repo = RetryingEntityRepository::new(inner.clone(), RetryPolicy::default());
    repo.create(Entity {
        id: "E1".to_string(),
        addresses: vec![address("1 Main St", "Leeds", "UK")],
        names: vec![name("Ann", "Lee")],
        ..dated("E1", 0)
    })
    .await
    .unwrap();

    repo.delete("E1").await.expect("delete succeeds");
    repo.delete("E1").await.expect("second delete is a no-op");

    assert!(repo.get_by_id("E1").await.unwrap().is_none());
    assert_eq!(inner.child_row_count().await, 0);
}

#[tokio::test]
async fn free_text_terms_must_all_match_somewhere_in_the_graph() {
    let repo = repository();
    repo.create(Entity {
        id: "match".to_string(),
        addresses: vec![address("12 PennsylvaniaWest Road", "Harrisburg", "England")],
        ..Entity::default()
    })
    .await
    .unwrap();
    repo.create(Entity {
        id: "split-across-children".to_string(),
        addresses: vec![address("PENNSYLVANIAWEST Ave", "Erie", "USA")],
        names: vec![name("Roland", "Lee")],
        ..Entity::default()
    })
    .await
    .unwrap();
    repo.create(Entity {
        id: "only-one-term".to_string(),
        addresses: vec![address("PennsylvaniaWest Ave", "Erie", "USA")],
        ..Entity::default()
    })
    .await
    .unwrap();
    repo.create(Entity {
        id: "city-is-not-searched".to_string(),
        addresses: vec![Address {
            city: Some("PennsylvaniaWest Land".to_string()),
            ..Address::default()
        }],
        ..Entity::default()
    })
    .await
    .unwrap();

    let found = repo
        .search(EntitySearch {
            filters: SearchFilters::default().with_text(Some("PennsylvaniaWest%20Land")),
            ..EntitySearch::default()
        })
        .await
        .expect("search succeeds");

    assert_eq!(ids(&found), vec!["match", "split-across-children"]);
}

#[tokio::test]
async fn free_text_folds_non_ascii_letters() {
    let repo = repository();
    for (id, line) in [("A", "STRASSE MÜNCHEN"), ("B", "ÉCOLE Road"), ("C", "Munich Road")] {
        repo.create(Entity {
            id: id.to_string(),
            addresses: vec![address(line, "city", "DE")],
            ..Entity::default()
        })
        .await
        .unwrap();
    }

    for (text, expected) in [("münchen", vec!["A"]), ("École", vec!["B"]), ("road", vec!["B", "C"])] {
        let found = repo
            .search(EntitySearch {
                filters: SearchFilters::default().with_text(Some(text)),
                ..EntitySearch::default()
            })
            .await
            .unwrap();
        assert_eq!(ids(&found), expected, "search text {text:?}");
    }
}

#[tokio::test]
async fn country_set_filter_is_exact_and_case_sensitive() {
    let repo = repository();
    for (id, country) in [("E1", "JAPAN"), ("E2", "INDIA"), ("E3", "japan"), ("E4", "USA")] {
        repo.create(Entity {
            id: id.to_string(),
            addresses: vec![address("street", "city", country)],
            ..Entity::default()
        })
        .await
        .unwrap();
    }

    let found = repo
        .search(EntitySearch {
            filters: SearchFilters::default()
                .with_countries(vec!["JAPAN".to_string(), "INDIA".to_string()]),
            ..EntitySearch::default()
        })
        .await
        .unwrap();

    assert_eq!(ids(&found), vec!["E1", "E2"]);
}

#[tokio::test]
async fn date_range_bounds_are_inclusive_calendar_dates() {
    let repo = repository();
    for (id, offset) in [("today", 0), ("plus1", 1), ("plus3", 3), ("plus5", 5), ("plus6", 6)] {
        repo.create(dated(id, offset)).await.unwrap();
    }

    let today = Utc::now().date_naive();
    let found = repo
        .search(EntitySearch {
            filters: SearchFilters::default().with_date_range(
                Some(today + ChronoDuration::days(1)),
                Some(today + ChronoDuration::days(5)),
            ),
            ..EntitySearch::default()
        })
        .await
        .unwrap();

    assert_eq!(ids(&found), vec!["plus1", "plus3", "plus5"]);
}

#[tokio::test]
async fn second_page_of_twenty_skips_the_first_twenty() {
    let repo = repository();
    for index in 0..45 {
        repo.create(Entity {
            id: format!("E{index:02}"),
            ..Entity::default()
        })
        .await
        .unwrap();
    }

    let page = repo
        .search(EntitySearch {
            page: Page::new(2, 20),
            ..EntitySearch::default()
        })
        .await
        .unwrap();

    let expected = (20..40).map(|index| format!("E{index:02}")).collect::<Vec<_>>();
    assert_eq!(
        page.iter().map(|entity| entity.id.clone()).collect::<Vec<_>>(),
        expected
    );

    let last = repo
        .search(EntitySearch {
            page: Page::new(3, 20),
            ..EntitySearch::default()
        })
        .await
        .unwrap();
    assert_eq!(last.len(), 5);
}

#[tokio::test]
async fn descending_surname_sort_puts_missing_values_last() {
    let repo = repository();
    for (id, names) in [
        ("a", vec![name("Zed", "Adams")]),
        ("b", vec![name("Amy", "Young"), name("Amy", "Aaron")]),
        ("c", Vec::new()),
        ("d", vec![name("Bo", "Adams")]),
    ] {
        repo.create(Entity {
            id: id.to_string(),
            names,
            ..Entity::default()
        })
        .await
        .unwrap();
    }

    let found = repo
        .search(EntitySearch {
            sort: EntitySort::new(SortKey::parse(Some("LastName")), SortOrder::Desc),
            ..EntitySearch::default()
        })
        .await
        .unwrap();

    assert_eq!(ids(&found), vec!["b", "a", "d", "c"]);

    let found = repo
        .search(EntitySearch {
            sort: EntitySort::new(SortKey::parse(Some("firstname")), SortOrder::Asc),
            ..EntitySearch::default()
        })
        .await
        .unwrap();

    assert_eq!(ids(&found), vec!["c", "b", "d", "a"]);
}

fn date_record(date: Option<DateTime<Utc>>) -> DateRecord {
    DateRecord {
        date_type: "DOB".to_string(),
        date,
        ..DateRecord::default()
    }
}

#[tokio::test]
async fn date_sort_uses_the_first_date_record_with_missing_dates_first() {
    let repo = repository();
    let at = |year, month, day| Some(Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap());
    for (id, dates) in [
        ("a", vec![date_record(at(2024, 3, 1)), date_record(at(2020, 1, 1))]),
        ("b", vec![date_record(at(2021, 6, 1))]),
        ("c", Vec::new()),
        ("d", vec![date_record(None)]),
        ("e", vec![date_record(at(2021, 6, 1))]),
    ] {
        repo.create(Entity {
            id: id.to_string(),
            dates,
            ..Entity::default()
        })
        .await
        .unwrap();
    }

    let ascending = repo
        .search(EntitySearch {
            sort: EntitySort::new(SortKey::parse(Some("Date")), SortOrder::Asc),
            ..EntitySearch::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&ascending), vec!["c", "d", "b", "e", "a"]);

    let descending = repo
        .search(EntitySearch {
            sort: EntitySort::new(SortKey::Date, SortOrder::Desc),
            ..EntitySearch::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&descending), vec!["a", "b", "e", "c", "d"]);
}

#[tokio::test]
async fn duplicate_ids_surface_as_conflicts_without_retrying() {
    let repo = repository();
    repo.create(dated("E1", 0)).await.unwrap();

    let err = repo.create(dated("E1", 0)).await.expect_err("duplicate id");
    assert!(matches!(err, DomainError::Conflict(_)));
}

/// Fails `get_by_id` with a transient error a fixed number of times.
struct FlakyRepository {
    inner: InMemoryEntityRepository,
    failures: u32,
    calls: AtomicU32,
}

impl FlakyRepository {
    fn new(failures: u32) -> Self {
        Self {
            inner: InMemoryEntityRepository::new(),
            failures,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityRepository for FlakyRepository {
    async fn init(&self) -> Result<(), DomainError> {
        Ok(())
    }

    async fn create(&self, entity: Entity) -> Result<(), DomainError> {
        self.inner.create(entity).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Entity>, DomainError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(DomainError::unavailable(format!("connection reset ({call})")));
        }
        self.inner.get_by_id(id).await
    }

    async fn update(&self, entity: Entity) -> Result<(), DomainError> {
        self.inner.update(entity).await
    }

    async fn delete(&self, id: &str) -> Result<(), DomainError> {
        self.inner.delete(id).await
    }

    async fn search(&self, search: EntitySearch) -> Result<Vec<Entity>, DomainError> {
        self.inner.search(search).await
    }
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_until_the_fourth_call_succeeds() {
    let flaky = Arc::new(FlakyRepository::new(3));
    let repo = RetryingEntityRepository::new(flaky.clone(), RetryPolicy::default());
    repo.create(dated("E1", 0)).await.unwrap();

    let started = tokio::time::Instant::now();
    let found = repo.get_by_id("E1").await.expect("fourth call succeeds");

    assert!(found.is_some());
    assert_eq!(flaky.calls(), 4);
    assert!(started.elapsed() >= Duration::from_secs(14));
}

#[tokio::test(start_paused = true)]
async fn retries_stop_after_four_calls_with_the_last_failure() {
    let flaky = Arc::new(FlakyRepository::new(u32::MAX));
    let repo = RetryingEntityRepository::new(flaky.clone(), RetryPolicy::default());

    let err = repo.get_by_id("E1").await.expect_err("all attempts fail");

    assert_eq!(flaky.calls(), 4);
    match err {
        DomainError::Unavailable(message) => assert_eq!(message, "connection reset (4)"),
        other => panic!("expected the store failure, got {other:?}"),
    }
}
