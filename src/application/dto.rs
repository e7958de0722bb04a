use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{
    entity::{Address, DateRecord, Entity, Name},
    errors::DomainError,
    search::{
        DEFAULT_PAGE_NUMBER, DEFAULT_PAGE_SIZE, EntitySearch, EntitySort, Page, SearchFilters,
        SortKey, SortOrder,
    },
};

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDto {
    pub id: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub deceased: bool,
    #[serde(default)]
    pub addresses: Option<Vec<AddressDto>>,
    #[serde(default)]
    pub names: Option<Vec<NameDto>>,
    #[serde(default)]
    pub dates: Option<Vec<DateRecordDto>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub address_line: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameDto {
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRecordDto {
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub date_type: String,
    #[serde(default, deserialize_with = "deserialize_optional_date_time")]
    pub date: Option<DateTime<Utc>>,
}

impl EntityDto {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.id.trim().is_empty() {
            return Err(DomainError::validation("entity id must not be blank"));
        }
        Ok(())
    }
}

impl From<EntityDto> for Entity {
    fn from(value: EntityDto) -> Self {
        Self {
            id: value.id,
            gender: value.gender,
            deceased: value.deceased,
            addresses: value
                .addresses
                .unwrap_or_default()
                .into_iter()
                .map(Address::from)
                .collect(),
            names: value
                .names
                .unwrap_or_default()
                .into_iter()
                .map(Name::from)
                .collect(),
            dates: value
                .dates
                .unwrap_or_default()
                .into_iter()
                .map(DateRecord::from)
                .collect(),
        }
    }
}

impl From<AddressDto> for Address {
    fn from(value: AddressDto) -> Self {
        Self {
            id: value.id,
            entity_id: value.entity_id,
            address_line: value.address_line,
            city: value.city,
            country: value.country,
        }
    }
}

impl From<NameDto> for Name {
    fn from(value: NameDto) -> Self {
        Self {
            entity_id: value.entity_id,
            first_name: value.first_name,
            middle_name: value.middle_name,
            surname: value.surname,
        }
    }
}

impl From<DateRecordDto> for DateRecord {
    fn from(value: DateRecordDto) -> Self {
        Self {
            entity_id: value.entity_id,
            date_type: value.date_type,
            date: value.date,
        }
    }
}

impl From<Entity> for EntityDto {
    fn from(value: Entity) -> Self {
        Self {
            id: value.id,
            gender: value.gender,
            deceased: value.deceased,
            addresses: Some(value.addresses.into_iter().map(AddressDto::from).collect()),
            names: Some(value.names.into_iter().map(NameDto::from).collect()),
            dates: Some(value.dates.into_iter().map(DateRecordDto::from).collect()),
        }
    }
}

impl From<Address> for AddressDto {
    fn from(value: Address) -> Self {
        Self {
            id: value.id,
            entity_id: value.entity_id,
            address_line: value.address_line,
            city: value.city,
            country: value.country,
        }
    }
}

impl From<Name> for NameDto {
    fn from(value: Name) -> Self {
        Self {
            entity_id: value.entity_id,
            first_name: value.first_name,
            middle_name: value.middle_name,
            surname: value.surname,
        }
    }
}

impl From<DateRecord> for DateRecordDto {
    fn from(value: DateRecord) -> Self {
        Self {
            entity_id: value.entity_id,
            date_type: value.date_type,
            date: value.date,
        }
    }
}

/// Query string of the entity listing endpoint. Built from raw key/value
/// pairs so `countries` can repeat; keys are matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntitiesQueryRequest {
    pub search: Option<String>,
    pub gender: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub countries: Vec<String>,
    pub page_number: u32,
    pub page_size: u32,
    pub sort_by: Option<String>,
    pub ascending: bool,
}

impl Default for ListEntitiesQueryRequest {
    fn default() -> Self {
        Self {
            search: None,
            gender: None,
            start_date: None,
            end_date: None,
            countries: Vec::new(),
            page_number: DEFAULT_PAGE_NUMBER,
            page_size: DEFAULT_PAGE_SIZE,
            sort_by: None,
            ascending: true,
        }
    }
}

impl ListEntitiesQueryRequest {
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Result<Self, DomainError> {
        let mut query = Self::default();

        for (key, value) in pairs {
            match key.to_ascii_lowercase().as_str() {
                "search" => query.search = Some(value),
                "gender" => query.gender = Some(value),
                "startdate" => query.start_date = parse_query_date("startDate", &value)?,
                "enddate" => query.end_date = parse_query_date("endDate", &value)?,
                "countries" => {
                    if !value.is_empty() {
                        query.countries.push(value);
                    }
                }
                "pagenumber" => query.page_number = parse_query_u32("pageNumber", &value)?,
                "pagesize" => query.page_size = parse_query_u32("pageSize", &value)?,
                "sortby" => query.sort_by = Some(value),
                "ascending" => {
                    query.ascending = value.trim().parse::<bool>().map_err(|_| {
                        DomainError::validation("ascending must be true or false")
                    })?;
                }
                _ => {}
            }
        }

        Ok(query)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.page_number == 0 {
            return Err(DomainError::validation("pageNumber must be greater than 0"));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(DomainError::validation(format!(
                "pageSize must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }

    pub fn into_domain(self) -> EntitySearch {
        let filters = SearchFilters::default()
            .with_text(self.search.as_deref())
            .with_gender(self.gender)
            .with_date_range(self.start_date, self.end_date)
            .with_countries(self.countries);

        let sort = EntitySort::new(
            SortKey::parse(self.sort_by.as_deref()),
            SortOrder::from_ascending(self.ascending),
        );

        EntitySearch::new(filters, sort, Page::new(self.page_number, self.page_size))
    }
}

fn parse_query_u32(name: &str, raw: &str) -> Result<u32, DomainError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| DomainError::validation(format!("{name} must be a non-negative integer")))
}

fn parse_query_date(name: &str, raw: &str) -> Result<Option<NaiveDate>, DomainError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }

    // Form decoding turns an unescaped `+05:00` offset into ` 05:00`.
    parse_date_time(raw)
        .or_else(|| parse_date_time(&raw.trim().replace(' ', "+")))
        .map(|value| Some(value.date_naive()))
        .ok_or_else(|| {
            DomainError::validation(format!("{name} must be a date (YYYY-MM-DD) or RFC 3339 date-time"))
        })
}

/// Accepts RFC 3339, a date-time without offset (taken as UTC) or a bare date
/// (midnight UTC).
pub fn parse_date_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(value) = DateTime::parse_from_rfc3339(raw) {
        return Some(value.with_timezone(&Utc));
    }
    if let Ok(value) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(value.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|value| value.and_utc())
}

fn deserialize_optional_date_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_date_time(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid date: {raw}"))),
    }
}
