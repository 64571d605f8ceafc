use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::error::{AppError, AppResult};
use crate::store::{PageReq, DEFAULT_PAGE_SIZE};

pub mod agents;
pub mod catalog;
pub mod events;
pub mod groups;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod participants;
pub mod pools;
pub mod services;
pub mod tokens;
pub mod vault;

/// Splits the raw query pairs into pagination controls and filter fields.
/// Every non-reserved key is a declared filter; repeats accumulate.
pub fn page_req(params: &[(String, String)]) -> AppResult<PageReq> {
    let mut req = PageReq::default();
    for (key, value) in params {
        match key.as_str() {
            "page" => {
                req.page = value
                    .parse()
                    .map_err(|_| AppError::BadRequest(format!("invalid page: {value}")))?;
            }
            "pageSize" => {
                req.page_size = value
                    .parse()
                    .map_err(|_| AppError::BadRequest(format!("invalid pageSize: {value}")))?;
            }
            "sort" | "sortBy" => req.sort_by = Some(value.clone()),
            "sortAsc" => {
                req.sort_asc = value
                    .parse()
                    .map_err(|_| AppError::BadRequest(format!("invalid sortAsc: {value}")))?;
            }
            _ => req
                .filters
                .entry(key.clone())
                .or_default()
                .push(value.clone()),
        }
    }
    if req.page < 1 {
        return Err(AppError::BadRequest("page starts at 1".into()));
    }
    if req.page_size < 1 {
        req.page_size = DEFAULT_PAGE_SIZE;
    }
    Ok(req)
}

pub fn routes() -> Router {
    Router::new()
        .route(
            "/api/v1/participants",
            get(participants::list).post(participants::create),
        )
        .route(
            "/api/v1/participants/:id",
            get(participants::get_one)
                .patch(participants::update)
                .delete(participants::remove),
        )
        .route(
            "/api/v1/agent-types",
            get(catalog::list_agent_types).post(catalog::create_agent_type),
        )
        .route(
            "/api/v1/agent-types/:id",
            get(catalog::get_agent_type).delete(catalog::delete_agent_type),
        )
        .route(
            "/api/v1/service-types",
            get(catalog::list_service_types).post(catalog::create_service_type),
        )
        .route(
            "/api/v1/service-types/:id",
            get(catalog::get_service_type).delete(catalog::delete_service_type),
        )
        .route(
            "/api/v1/service-option-types",
            get(catalog::list_option_types).post(catalog::create_option_type),
        )
        .route(
            "/api/v1/service-option-types/:id",
            get(catalog::get_option_type).delete(catalog::delete_option_type),
        )
        .route(
            "/api/v1/service-options",
            get(catalog::list_options).post(catalog::create_option),
        )
        .route(
            "/api/v1/service-options/:id",
            get(catalog::get_option).delete(catalog::delete_option),
        )
        .route("/api/v1/agents", get(agents::list).post(agents::create))
        .route(
            "/api/v1/agents/:id",
            get(agents::get_one).patch(agents::update).delete(agents::remove),
        )
        .route("/api/v1/service-groups", get(groups::list).post(groups::create))
        .route(
            "/api/v1/service-groups/:id",
            get(groups::get_one).patch(groups::update).delete(groups::remove),
        )
        .route("/api/v1/services", get(services::list).post(services::create))
        .route(
            "/api/v1/services/:id",
            get(services::get_one)
                .patch(services::update_properties)
                .delete(services::remove),
        )
        .route("/api/v1/services/:id/actions", post(services::execute_action))
        .route("/api/v1/services/:id/uptime", get(services::uptime))
        .route("/api/v1/jobs", get(jobs::list))
        .route("/api/v1/jobs/claim", post(jobs::claim))
        .route("/api/v1/jobs/:id", get(jobs::get_one))
        .route("/api/v1/jobs/:id/outcome", post(jobs::report_outcome))
        .route("/api/v1/events", get(events::list))
        .route("/api/v1/events/:id", get(events::get_one))
        .route(
            "/api/v1/events/subscriptions",
            get(events::list_subscriptions),
        )
        .route(
            "/api/v1/events/subscriptions/:subscriber_id/lease",
            post(events::acquire_lease)
                .put(events::renew_lease)
                .delete(events::release_lease),
        )
        .route(
            "/api/v1/events/subscriptions/:subscriber_id/poll",
            post(events::poll),
        )
        .route(
            "/api/v1/events/subscriptions/:subscriber_id/ack",
            post(events::acknowledge),
        )
        .route(
            "/api/v1/service-pool-sets",
            get(pools::list_sets).post(pools::create_set),
        )
        .route(
            "/api/v1/service-pool-sets/:id",
            get(pools::get_set).delete(pools::delete_set),
        )
        .route(
            "/api/v1/service-pools",
            get(pools::list_pools).post(pools::create_pool),
        )
        .route(
            "/api/v1/service-pools/:id",
            get(pools::get_pool).delete(pools::delete_pool),
        )
        .route(
            "/api/v1/service-pool-values",
            get(pools::list_values).post(pools::create_value),
        )
        .route("/api/v1/service-pool-values/:id", delete(pools::delete_value))
        .route(
            "/api/v1/metric-types",
            get(metrics::list_types).post(metrics::create_type),
        )
        .route(
            "/api/v1/metric-types/:id",
            get(metrics::get_type).delete(metrics::delete_type),
        )
        .route(
            "/api/v1/metric-entries",
            get(metrics::list_entries).post(metrics::record_entry),
        )
        .route("/api/v1/tokens", get(tokens::list).post(tokens::create))
        .route(
            "/api/v1/tokens/:id",
            get(tokens::get_one).delete(tokens::remove),
        )
        .route("/api/v1/vault/secrets", post(vault::create))
        .route(
            "/api/v1/vault/secrets/:reference",
            get(vault::get_one).delete(vault::remove),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn pagination_keys_are_reserved() {
        let req = page_req(&pairs(&[
            ("page", "2"),
            ("pageSize", "50"),
            ("sortBy", "name"),
            ("sortAsc", "false"),
            ("status", "connected"),
            ("status", "new"),
        ]))
        .unwrap();
        assert_eq!(req.page, 2);
        assert_eq!(req.page_size, 50);
        assert_eq!(req.sort_by.as_deref(), Some("name"));
        assert!(!req.sort_asc);
        assert_eq!(
            req.filters.get("status").map(Vec::len),
            Some(2),
            "repeated filters accumulate"
        );
    }

    #[test]
    fn bad_pagination_values_are_rejected() {
        assert!(page_req(&pairs(&[("page", "zero")])).is_err());
        assert!(page_req(&pairs(&[("page", "0")])).is_err());
        assert!(page_req(&pairs(&[("sortAsc", "sideways")])).is_err());
    }
}
