use std::cmp::Ordering;

use chrono::NaiveDate;

use crate::domain::entity::{Address, Entity, Name};

pub const DEFAULT_PAGE_NUMBER: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// A complete search request against the entity graph: which entities match,
/// how they are ordered and which slice of the ordered result is returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitySearch {
    pub filters: SearchFilters,
    pub sort: EntitySort,
    pub page: Page,
}

/// Conjunctive filters. An empty field means "not filtered on".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    /// Lowercased free-text terms; every term has to match somewhere.
    pub terms: Vec<String>,
    pub gender: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub countries: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    FirstName,
    LastName,
    Date,
    #[default]
    Id,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntitySort {
    pub key: SortKey,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            number: DEFAULT_PAGE_NUMBER,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Splits raw search text into lowercase terms. A literal `%20` counts as a
/// space; empty terms are dropped.
pub fn search_terms(raw: &str) -> Vec<String> {
    fold_case(raw)
        .replace("%20", " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Unicode lowercase used on both sides of a text comparison. Stores that
/// cannot fold in the database keep a copy of each searchable column folded
/// with this function.
pub fn fold_case(value: &str) -> String {
    value.to_lowercase()
}

impl SearchFilters {
    pub fn with_text(mut self, raw: Option<&str>) -> Self {
        self.terms = raw.map(search_terms).unwrap_or_default();
        self
    }

    pub fn with_gender(mut self, gender: Option<String>) -> Self {
        self.gender = gender.filter(|value| !value.is_empty());
        self
    }

    pub fn with_date_range(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn with_countries(mut self, countries: Vec<String>) -> Self {
        self.countries = countries;
        self
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        self.terms.iter().all(|term| matches_term(entity, term))
            && self
                .gender
                .as_ref()
                .is_none_or(|gender| entity.gender.as_ref() == Some(gender))
            && self.start_date.is_none_or(|start| {
                entity
                    .dates
                    .iter()
                    .any(|d| d.date.is_some_and(|date| date.date_naive() >= start))
            })
            && self.end_date.is_none_or(|end| {
                entity
                    .dates
                    .iter()
                    .any(|d| d.date.is_some_and(|date| date.date_naive() <= end))
            })
            && (self.countries.is_empty()
                || entity.addresses.iter().any(|address| {
                    address
                        .country
                        .as_ref()
                        .is_some_and(|country| self.countries.contains(country))
                }))
    }
}

fn matches_term(entity: &Entity, term: &str) -> bool {
    entity
        .addresses
        .iter()
        .any(|address| address_contains(address, term))
        || entity.names.iter().any(|name| name_contains(name, term))
}

fn address_contains(address: &Address, term: &str) -> bool {
    field_contains(address.country.as_deref(), term)
        || field_contains(address.address_line.as_deref(), term)
}

fn name_contains(name: &Name, term: &str) -> bool {
    field_contains(name.first_name.as_deref(), term)
        || field_contains(name.middle_name.as_deref(), term)
        || field_contains(name.surname.as_deref(), term)
}

// Absent values never match.
fn field_contains(field: Option<&str>, term: &str) -> bool {
    field.is_some_and(|value| fold_case(value).contains(term))
}

impl SortKey {
    /// Case-insensitive; unknown or missing keys order by id.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::Id;
        };

        match raw.to_lowercase().as_str() {
            "firstname" => Self::FirstName,
            "lastname" => Self::LastName,
            "date" => Self::Date,
            _ => Self::Id,
        }
    }
}

impl SortOrder {
    pub fn from_ascending(ascending: bool) -> Self {
        if ascending { Self::Asc } else { Self::Desc }
    }
}

impl EntitySort {
    pub fn new(key: SortKey, order: SortOrder) -> Self {
        Self { key, order }
    }

    /// Orders by the requested key, then by id ascending so that equal keys
    /// keep a stable position across pages. Missing keys sort first when
    /// ascending.
    pub fn compare(&self, left: &Entity, right: &Entity) -> Ordering {
        let ordering = match self.key {
            SortKey::FirstName => first_name_of(left).cmp(&first_name_of(right)),
            SortKey::LastName => surname_of(left).cmp(&surname_of(right)),
            SortKey::Date => first_date_of(left).cmp(&first_date_of(right)),
            SortKey::Id => left.id.cmp(&right.id),
        };

        let ordering = match self.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };

        ordering.then_with(|| left.id.cmp(&right.id))
    }
}

fn first_name_of(entity: &Entity) -> Option<&str> {
    entity
        .first_name_record()
        .and_then(|name| name.first_name.as_deref())
}

fn surname_of(entity: &Entity) -> Option<&str> {
    entity
        .first_name_record()
        .and_then(|name| name.surname.as_deref())
}

fn first_date_of(entity: &Entity) -> Option<chrono::DateTime<chrono::Utc>> {
    entity.first_date_record().and_then(|date| date.date)
}

impl Page {
    pub fn new(number: u32, size: u32) -> Self {
        Self { number, size }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.number.saturating_sub(1)) * u64::from(self.size)
    }
}

impl EntitySearch {
    pub fn new(filters: SearchFilters, sort: EntitySort, page: Page) -> Self {
        Self {
            filters,
            sort,
            page,
        }
    }

    /// Filters, sorts and pages an already loaded set of aggregates.
    pub fn apply(&self, mut entities: Vec<Entity>) -> Vec<Entity> {
        entities.retain(|entity| self.filters.matches(entity));
        entities.sort_by(|left, right| self.sort.compare(left, right));

        let offset = usize::try_from(self.page.offset()).unwrap_or(usize::MAX);
        let size = usize::try_from(self.page.size).unwrap_or(usize::MAX);
        entities.into_iter().skip(offset).take(size).collect()
    }
}
