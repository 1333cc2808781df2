//! HTTP handler functions for the metalert search API.

use std::str::FromStr as _;

use actix_web::{HttpResponse, http::StatusCode, web};
use metalert_geometry::codec;
use metalert_models::Domain;
use metalert_search::{SearchEngine, SearchError};
use metalert_server_models::{ApiHealth, ApiSearchResponse, PayloadError, SearchRequest};
use serde_json::Value;

use crate::AppState;

/// `GET /v1/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Any method other than `POST` on a search target.
pub async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

/// `POST /v1/search/{target}`
///
/// Runs an overlap search against the `alert` or `map` records.
pub async fn search(
    state: web::Data<AppState>,
    target: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    let target = target.into_inner();
    if target == "coffee" {
        return text(StatusCode::IM_A_TEAPOT, "I'm a teapot");
    }
    let Ok(domain) = Domain::from_str(&target) else {
        return text(
            StatusCode::NOT_FOUND,
            &format!("No such search target '{target}'"),
        );
    };

    let request = match serde_json::from_slice::<Value>(&body)
        .map_err(|_| PayloadError::NotJson)
        .and_then(|payload| SearchRequest::from_payload(&payload))
    {
        Ok(request) => request,
        Err(e) => return bad_request(e),
    };

    let Ok(polygon) = codec::decode(&request.polygon) else {
        return bad_request(PayloadError::Polygon);
    };

    let Ok(index) = state.index.lock() else {
        log::error!("Index lock is poisoned");
        return text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
    };

    let engine = SearchEngine::new(&state.config, &index);
    match engine.find_overlap(
        domain,
        &polygon,
        request.vertical,
        request.cutoff,
        request.max_results,
    ) {
        Ok(response) => HttpResponse::Ok().json(ApiSearchResponse::from(response)),
        Err(SearchError::InvalidQuery(reason)) => {
            log::info!("Rejected search query: {reason}");
            bad_request(PayloadError::Polygon)
        }
        Err(e) => {
            log::error!("Failed to search {domain} records: {e}");
            text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn bad_request(e: PayloadError) -> HttpResponse {
    text(StatusCode::BAD_REQUEST, &e.to_string())
}

fn text(status: StatusCode, message: &str) -> HttpResponse {
    HttpResponse::build(status)
        .content_type("text/plain; charset=utf-8")
        .body(format!("{message}\n"))
}
