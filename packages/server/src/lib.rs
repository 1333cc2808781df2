#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for metalert polygon search.
//!
//! Serves `POST /v1/search/{alert|map}` and `GET /v1/health` on top of the
//! configured data folder and index.

mod handlers;

use std::sync::Mutex;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use metalert_config::Config;
use metalert_database::SpatialIndex;

/// Shared application state.
pub struct AppState {
    /// Paths of the data folder and index.
    pub config: Config,
    /// The index connection. `duckdb::Connection` is `Send` but not `Sync`,
    /// so a `Mutex` is needed.
    pub index: Mutex<SpatialIndex>,
}

impl AppState {
    /// Opens the index named by `config`.
    ///
    /// # Errors
    ///
    /// Returns the index error if the store cannot be opened.
    pub fn open(config: Config) -> Result<Self, metalert_database::DbError> {
        let index = SpatialIndex::open(&config.index_file())?;
        Ok(Self {
            config,
            index: Mutex::new(index),
        })
    }
}

/// Registers the API routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1")
            .route("/health", web::get().to(handlers::health))
            .service(
                web::resource("/search/{target}")
                    .route(web::post().to(handlers::search))
                    .default_service(web::to(handlers::method_not_allowed)),
            ),
    );
}

/// Starts the API server on `BIND_ADDR:PORT` (default `127.0.0.1:8080`).
///
/// This is a regular async function; the caller provides the runtime (e.g.
/// via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind or
/// encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server(state: AppState) -> std::io::Result<()> {
    let state = web::Data::new(state);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
