use sqlx::{Postgres, QueryBuilder};

use crate::domain::{
    errors::DomainError,
    search::{EntitySearch, SearchFilters, SortKey, SortOrder},
};

/// Builds the single statement that selects one page of entity rows.
///
/// Child collections are not joined here; filters on them are correlated
/// `EXISTS` sub-queries, so a parent row appears at most once and paging
/// counts entities rather than joined rows. Text comparisons use the "C"
/// collation so the database orders exactly like byte-wise `str` ordering.
/// Non-id sort keys get `id` as a secondary key.
pub fn build_search_query(
    search: &EntitySearch,
) -> Result<QueryBuilder<'static, Postgres>, DomainError> {
    let offset = i64::try_from(search.page.offset())
        .map_err(|_| DomainError::validation("page offset is too large"))?;
    let limit = i64::from(search.page.size);

    let mut builder =
        QueryBuilder::<Postgres>::new("SELECT e.id, e.gender, e.deceased FROM entities e");
    let mut has_where = false;
    push_filters(&mut builder, &mut has_where, &search.filters);

    builder.push(" ORDER BY ");
    builder.push(sort_expression(search.sort.key));
    builder.push(" ");
    builder.push(sort_direction(search.sort.order));
    if search.sort.key != SortKey::Id {
        builder.push(r#", e.id COLLATE "C" ASC"#);
    }

    builder
        .push(" LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    Ok(builder)
}

fn push_filters(
    builder: &mut QueryBuilder<'static, Postgres>,
    has_where: &mut bool,
    filters: &SearchFilters,
) {
    for term in &filters.terms {
        push_where_prefix(builder, has_where);
        push_term_filter(builder, term);
    }

    if let Some(gender) = filters.gender.as_ref() {
        push_where_prefix(builder, has_where);
        builder.push("e.gender = ").push_bind(gender.clone());
    }

    if let Some(start_date) = filters.start_date {
        push_where_prefix(builder, has_where);
        builder
            .push(
                "EXISTS (SELECT 1 FROM entity_dates d WHERE d.entity_id = e.id \
                 AND d.date IS NOT NULL AND (d.date AT TIME ZONE 'UTC')::date >= ",
            )
            .push_bind(start_date)
            .push(")");
    }

    if let Some(end_date) = filters.end_date {
        push_where_prefix(builder, has_where);
        builder
            .push(
                "EXISTS (SELECT 1 FROM entity_dates d WHERE d.entity_id = e.id \
                 AND d.date IS NOT NULL AND (d.date AT TIME ZONE 'UTC')::date <= ",
            )
            .push_bind(end_date)
            .push(")");
    }

    if !filters.countries.is_empty() {
        push_where_prefix(builder, has_where);
        builder
            .push(
                "EXISTS (SELECT 1 FROM entity_addresses a WHERE a.entity_id = e.id \
                 AND a.country = ANY(",
            )
            .push_bind(filters.countries.clone())
            .push("))");
    }
}

// Terms are already folded; they are compared against the `_folded` copies
// written at insert time. NULL columns make STRPOS yield NULL, which never
// satisfies the predicate.
fn push_term_filter(builder: &mut QueryBuilder<'static, Postgres>, term: &str) {
    builder.push("(EXISTS (SELECT 1 FROM entity_addresses a WHERE a.entity_id = e.id AND (");
    push_contains(builder, "a.country_folded", term);
    builder.push(" OR ");
    push_contains(builder, "a.address_line_folded", term);
    builder.push(")) OR EXISTS (SELECT 1 FROM entity_names n WHERE n.entity_id = e.id AND (");
    push_contains(builder, "n.first_name_folded", term);
    builder.push(" OR ");
    push_contains(builder, "n.middle_name_folded", term);
    builder.push(" OR ");
    push_contains(builder, "n.surname_folded", term);
    builder.push(")))");
}

fn push_contains(builder: &mut QueryBuilder<'static, Postgres>, column: &str, term: &str) {
    builder
        .push("STRPOS(")
        .push(column)
        .push(", ")
        .push_bind(term.to_string())
        .push(") > 0");
}

fn push_where_prefix(builder: &mut QueryBuilder<'static, Postgres>, has_where: &mut bool) {
    if !*has_where {
        builder.push(" WHERE ");
        *has_where = true;
    } else {
        builder.push(" AND ");
    }
}

fn sort_expression(key: SortKey) -> &'static str {
    match key {
        SortKey::FirstName => {
            r#"(SELECT n.first_name FROM entity_names n WHERE n.entity_id = e.id ORDER BY n.id LIMIT 1) COLLATE "C""#
        }
        SortKey::LastName => {
            r#"(SELECT n.surname FROM entity_names n WHERE n.entity_id = e.id ORDER BY n.id LIMIT 1) COLLATE "C""#
        }
        SortKey::Date => {
            "(SELECT d.date FROM entity_dates d WHERE d.entity_id = e.id ORDER BY d.id LIMIT 1)"
        }
        SortKey::Id => r#"e.id COLLATE "C""#,
    }
}

// Missing sort values come first when ascending, last when descending.
fn sort_direction(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Asc => "ASC NULLS FIRST",
        SortOrder::Desc => "DESC NULLS LAST",
    }
}
