use std::collections::HashMap;

use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::identity::{Identity, Role};

pub mod agent_types;
pub mod agents;
pub mod events;
pub mod groups;
pub mod jobs;
pub mod metrics;
pub mod options;
pub mod participants;
pub mod pools;
pub mod service_types;
pub mod services;
pub mod subscriptions;
pub mod tokens;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// A paged list request: 1-based page, declared filters, optional sort.
#[derive(Clone, Debug)]
pub struct PageReq {
    pub page: i64,
    pub page_size: i64,
    pub filters: HashMap<String, Vec<String>>,
    pub sort_by: Option<String>,
    pub sort_asc: bool,
}

impl Default for PageReq {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            filters: HashMap::new(),
            sort_by: None,
            sort_asc: true,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_items: i64,
    pub total_pages: i64,
    pub current_page: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

/// How a declared filter field parses and matches.
#[derive(Clone, Copy, Debug)]
pub enum FilterKind {
    /// Exact match on a uuid column, `IN` semantics for repeats.
    Id,
    /// Exact match on a text column, `IN` semantics for repeats.
    Exact,
    /// Case-insensitive substring match on a text column.
    Contains,
    /// Exact match on an integer column.
    Int,
}

#[derive(Clone, Copy, Debug)]
pub struct FilterField {
    pub name: &'static str,
    pub column: &'static str,
    pub kind: FilterKind,
}

/// Ownership columns present on a table; drives the scope filter.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScopeColumns {
    pub participant: Option<&'static str>,
    pub provider: Option<&'static str>,
    pub consumer: Option<&'static str>,
    pub agent: Option<&'static str>,
}

/// Declared list surface of one entity table.
pub struct EntitySpec {
    pub table: &'static str,
    pub columns: &'static str,
    pub filters: &'static [FilterField],
    pub scope: ScopeColumns,
    pub default_sort: &'static str,
}

impl EntitySpec {
    fn filter(&self, name: &str) -> Option<&FilterField> {
        self.filters.iter().find(|f| f.name == name)
    }

    fn sort_column(&self, sort_by: &str) -> Option<&'static str> {
        if sort_by == "createdAt" {
            return Some("created_at");
        }
        self.filter(sort_by).map(|f| f.column)
    }
}

fn push_scope(qb: &mut QueryBuilder<'_, Postgres>, spec: &EntitySpec, identity: &Identity) {
    match identity.role {
        Role::Admin => {}
        Role::Participant => {
            let pid = identity.participant_id.unwrap_or(Uuid::nil());
            let columns: Vec<&str> = [
                spec.scope.participant,
                spec.scope.provider,
                spec.scope.consumer,
            ]
            .into_iter()
            .flatten()
            .collect();
            if columns.is_empty() {
                qb.push(" AND FALSE");
                return;
            }
            qb.push(" AND (");
            for (i, column) in columns.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                qb.push(*column).push(" = ").push_bind(pid);
            }
            qb.push(")");
        }
        Role::Agent => match spec.scope.agent {
            Some(column) => {
                let aid = identity.agent_id.unwrap_or(Uuid::nil());
                qb.push(" AND ").push(column).push(" = ").push_bind(aid);
            }
            None => {
                qb.push(" AND FALSE");
            }
        },
    }
}

fn push_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    spec: &EntitySpec,
    req: &PageReq,
) -> AppResult<()> {
    for (name, values) in &req.filters {
        let field = spec
            .filter(name)
            .ok_or_else(|| AppError::BadRequest(format!("unknown filter field: {name}")))?;
        if values.is_empty() {
            continue;
        }
        match field.kind {
            FilterKind::Id => {
                let ids = values
                    .iter()
                    .map(|v| {
                        Uuid::parse_str(v).map_err(|_| {
                            AppError::BadRequest(format!("filter {name}: not a valid id: {v}"))
                        })
                    })
                    .collect::<AppResult<Vec<Uuid>>>()?;
                qb.push(" AND ")
                    .push(field.column)
                    .push(" = ANY(")
                    .push_bind(ids)
                    .push(")");
            }
            FilterKind::Exact => {
                qb.push(" AND ")
                    .push(field.column)
                    .push(" = ANY(")
                    .push_bind(values.clone())
                    .push(")");
            }
            FilterKind::Contains => {
                qb.push(" AND (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        qb.push(" OR ");
                    }
                    qb.push(field.column)
                        .push(" ILIKE '%' || ")
                        .push_bind(value.clone())
                        .push(" || '%'");
                }
                qb.push(")");
            }
            FilterKind::Int => {
                let ints = values
                    .iter()
                    .map(|v| {
                        v.parse::<i64>().map_err(|_| {
                            AppError::BadRequest(format!("filter {name}: not an integer: {v}"))
                        })
                    })
                    .collect::<AppResult<Vec<i64>>>()?;
                qb.push(" AND ")
                    .push(field.column)
                    .push(" = ANY(")
                    .push_bind(ints)
                    .push(")");
            }
        }
    }
    Ok(())
}

/// Scope filter, declared filters, count, sort, paginate — in that order.
pub async fn list_page<T>(
    pool: &PgPool,
    spec: &EntitySpec,
    identity: &Identity,
    req: &PageReq,
) -> AppResult<Page<T>>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
{
    let page = req.page.max(1);
    let page_size = req.page_size.clamp(1, MAX_PAGE_SIZE);

    let mut count_qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {} WHERE TRUE", spec.table));
    push_scope(&mut count_qb, spec, identity);
    push_filters(&mut count_qb, spec, req)?;
    let total_items: i64 = count_qb
        .build_query_as::<(i64,)>()
        .fetch_one(pool)
        .await
        .map_err(AppError::from)?
        .0;

    let sort_column = match &req.sort_by {
        Some(field) => spec
            .sort_column(field)
            .ok_or_else(|| AppError::BadRequest(format!("unknown sort field: {field}")))?,
        None => spec.default_sort,
    };
    let direction = if req.sort_asc { "ASC" } else { "DESC" };

    let mut qb = QueryBuilder::new(format!(
        "SELECT {} FROM {} WHERE TRUE",
        spec.columns, spec.table
    ));
    push_scope(&mut qb, spec, identity);
    push_filters(&mut qb, spec, req)?;
    qb.push(format!(" ORDER BY {sort_column} {direction}"));
    qb.push(" LIMIT ")
        .push_bind(page_size)
        .push(" OFFSET ")
        .push_bind((page - 1) * page_size);
    let items: Vec<T> = qb
        .build_query_as()
        .fetch_all(pool)
        .await
        .map_err(AppError::from)?;

    let total_pages = if total_items == 0 {
        0
    } else {
        (total_items + page_size - 1) / page_size
    };
    Ok(Page {
        items,
        total_items,
        total_pages,
        current_page: page,
        has_next: page < total_pages,
        has_prev: page > 1 && total_pages > 0,
    })
}

/// `update` contract helper: zero affected rows means the target vanished.
pub fn expect_updated(result: sqlx::postgres::PgQueryResult) -> AppResult<()> {
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_filter_field_is_rejected() {
        let spec = EntitySpec {
            table: "participants",
            columns: "id",
            filters: &[FilterField {
                name: "status",
                column: "status",
                kind: FilterKind::Exact,
            }],
            scope: ScopeColumns::default(),
            default_sort: "id",
        };
        let mut req = PageReq::default();
        req.filters.insert("bogus".into(), vec!["x".into()]);
        let mut qb = QueryBuilder::new("SELECT 1 WHERE TRUE");
        assert!(matches!(
            push_filters(&mut qb, &spec, &req),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn sort_field_resolution() {
        let spec = EntitySpec {
            table: "agents",
            columns: "id",
            filters: &[FilterField {
                name: "name",
                column: "name",
                kind: FilterKind::Contains,
            }],
            scope: ScopeColumns::default(),
            default_sort: "id",
        };
        assert_eq!(spec.sort_column("name"), Some("name"));
        assert_eq!(spec.sort_column("createdAt"), Some("created_at"));
        assert_eq!(spec.sort_column("nope"), None);
    }
}
